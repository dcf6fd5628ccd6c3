// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 金字塔 Lucas-Kanade 稀疏光流
//! Pyramidal Lucas-Kanade sparse optical flow (used to shift tracked instances between frames)

use image::imageops::{self, FilterType};
use image::GrayImage;
use imageproc::filter::gaussian_blur_f32;

/// LK参数
#[derive(Debug, Clone, Copy)]
pub struct FlowParams {
    /// 窗口大小 (像素, 奇数)
    pub window_size: usize,
    /// 金字塔层数 (含原图)
    pub max_levels: usize,
    pub max_iterations: usize,
    /// 迭代收敛阈值 (像素)
    pub epsilon: f32,
}

impl FlowParams {
    pub fn new(window_size: usize, max_levels: usize) -> Self {
        Self {
            window_size: window_size.max(3),
            max_levels: max_levels.max(1),
            max_iterations: 30,
            epsilon: 0.01,
        }
    }
}

/// 单层浮点灰度图
#[derive(Clone)]
struct Plane {
    width: usize,
    height: usize,
    data: Vec<f32>,
}

impl Plane {
    fn from_gray(img: &GrayImage) -> Self {
        Self {
            width: img.width() as usize,
            height: img.height() as usize,
            data: img.as_raw().iter().map(|&v| v as f32).collect(),
        }
    }

    fn at(&self, x: isize, y: isize) -> f32 {
        let x = x.clamp(0, self.width as isize - 1) as usize;
        let y = y.clamp(0, self.height as isize - 1) as usize;
        self.data[y * self.width + x]
    }

    /// 双线性采样 (边界钳制)
    fn sample(&self, x: f32, y: f32) -> f32 {
        let x0 = x.floor();
        let y0 = y.floor();
        let fx = x - x0;
        let fy = y - y0;
        let (x0, y0) = (x0 as isize, y0 as isize);

        let a = self.at(x0, y0);
        let b = self.at(x0 + 1, y0);
        let c = self.at(x0, y0 + 1);
        let d = self.at(x0 + 1, y0 + 1);

        a * (1.0 - fx) * (1.0 - fy) + b * fx * (1.0 - fy) + c * (1.0 - fx) * fy + d * fx * fy
    }

    /// 中心差分梯度
    fn gradient(&self, x: f32, y: f32) -> (f32, f32) {
        let gx = (self.sample(x + 1.0, y) - self.sample(x - 1.0, y)) * 0.5;
        let gy = (self.sample(x, y + 1.0) - self.sample(x, y - 1.0)) * 0.5;
        (gx, gy)
    }
}

/// 图像金字塔, levels[0] 为原分辨率
#[derive(Clone)]
pub struct Pyramid {
    levels: Vec<Plane>,
}

impl Pyramid {
    /// 构建金字塔: 高斯平滑后降采样一半, 图像小于窗口时停止
    pub fn build(img: &GrayImage, params: &FlowParams) -> Self {
        let mut levels = vec![Plane::from_gray(img)];
        let mut current = img.clone();

        while levels.len() < params.max_levels {
            let (w, h) = (current.width() / 2, current.height() / 2);
            if (w as usize) < params.window_size || (h as usize) < params.window_size {
                break;
            }
            let blurred = gaussian_blur_f32(&current, 1.0);
            current = imageops::resize(&blurred, w, h, FilterType::Triangle);
            levels.push(Plane::from_gray(&current));
        }

        Self { levels }
    }

    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    pub fn width(&self) -> usize {
        self.levels[0].width
    }

    pub fn height(&self) -> usize {
        self.levels[0].height
    }
}

/// 计算 `points` 从 `prev` 到 `next` 的光流
///
/// 返回每个点的新位置, 跟丢 (矩阵奇异或越界) 时为 None
pub fn track_points(
    prev: &Pyramid,
    next: &Pyramid,
    points: &[(f32, f32)],
    params: &FlowParams,
) -> Vec<Option<(f32, f32)>> {
    let depth = prev.depth().min(next.depth());
    let half = (params.window_size / 2) as isize;

    points
        .iter()
        .map(|&(px, py)| {
            let mut guess = (0.0f32, 0.0f32);

            for level in (0..depth).rev() {
                let scale = (1u32 << level) as f32;
                let (ux, uy) = (px / scale, py / scale);
                let i = &prev.levels[level];
                let j = &next.levels[level];

                // 空间梯度矩阵 G
                let (mut gxx, mut gxy, mut gyy) = (0.0f32, 0.0f32, 0.0f32);
                let mut grads = Vec::with_capacity(((2 * half + 1) * (2 * half + 1)) as usize);
                for dy in -half..=half {
                    for dx in -half..=half {
                        let (x, y) = (ux + dx as f32, uy + dy as f32);
                        let (ix, iy) = i.gradient(x, y);
                        gxx += ix * ix;
                        gxy += ix * iy;
                        gyy += iy * iy;
                        grads.push((x, y, ix, iy, i.sample(x, y)));
                    }
                }

                let det = gxx * gyy - gxy * gxy;
                if det.abs() < 1e-6 {
                    return None;
                }

                let mut v = (0.0f32, 0.0f32);
                for _ in 0..params.max_iterations {
                    let (mut bx, mut by) = (0.0f32, 0.0f32);
                    for &(x, y, ix, iy, iv) in &grads {
                        let diff = iv - j.sample(x + guess.0 + v.0, y + guess.1 + v.1);
                        bx += diff * ix;
                        by += diff * iy;
                    }

                    let eta_x = (gyy * bx - gxy * by) / det;
                    let eta_y = (gxx * by - gxy * bx) / det;
                    v.0 += eta_x;
                    v.1 += eta_y;

                    if eta_x * eta_x + eta_y * eta_y < params.epsilon * params.epsilon {
                        break;
                    }
                }

                guess = if level > 0 {
                    (2.0 * (guess.0 + v.0), 2.0 * (guess.1 + v.1))
                } else {
                    (guess.0 + v.0, guess.1 + v.1)
                };
            }

            let (nx, ny) = (px + guess.0, py + guess.1);
            let inside = nx.is_finite()
                && ny.is_finite()
                && nx >= 0.0
                && ny >= 0.0
                && nx <= (next.width() - 1) as f32
                && ny <= (next.height() - 1) as f32;
            inside.then_some((nx, ny))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob(width: u32, height: u32, cx: f32, cy: f32, sigma: f32) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| {
            let d2 = (x as f32 - cx).powi(2) + (y as f32 - cy).powi(2);
            image::Luma([(255.0 * (-d2 / (2.0 * sigma * sigma)).exp()) as u8])
        })
    }

    #[test]
    fn test_pyramid_stops_below_window() {
        let params = FlowParams::new(21, 3);
        let pyr = Pyramid::build(&GrayImage::new(64, 64), &params);
        // 64 → 32 → (16 < 21 停止)
        assert_eq!(pyr.depth(), 2);
    }

    #[test]
    fn test_recovers_translation() {
        let params = FlowParams::new(21, 3);
        let prev = Pyramid::build(&blob(96, 96, 40.0, 40.0, 7.0), &params);
        let next = Pyramid::build(&blob(96, 96, 43.0, 42.0, 7.0), &params);

        let out = track_points(&prev, &next, &[(40.0, 40.0), (36.0, 44.0)], &params);
        for (orig, moved) in [(40.0, 40.0), (36.0, 44.0)].iter().zip(out) {
            let (nx, ny) = moved.expect("point lost");
            assert!((nx - orig.0 - 3.0).abs() < 0.5, "dx = {}", nx - orig.0);
            assert!((ny - orig.1 - 2.0).abs() < 0.5, "dy = {}", ny - orig.1);
        }
    }

    #[test]
    fn test_flat_region_is_lost() {
        let params = FlowParams::new(21, 1);
        let flat = Pyramid::build(&GrayImage::from_pixel(40, 40, image::Luma([128])), &params);
        let out = track_points(&flat, &flat, &[(20.0, 20.0)], &params);
        assert_eq!(out, vec![None]);
    }
}
