// 构建脚本: 链接FFmpeg解码/转码依赖库
fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Windows MSVC 下 ez-ffmpeg 需要显式链接的系统库
    #[cfg(all(target_os = "windows", target_env = "msvc"))]
    {
        // x264 编码器 (修复视频时的重新编码)
        println!("cargo:rustc-link-lib=dylib=libx264");

        // OLE 自动化和VFW (avformat/avdevice)
        for lib in ["oleaut32", "vfw32", "secur32"] {
            println!("cargo:rustc-link-lib=dylib={}", lib);
        }
    }
}
