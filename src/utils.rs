use tracing_subscriber::EnvFilter;

pub fn tracing_subscriber_init() {
    // 未设置 RUST_LOG 时默认输出 info 级别
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

pub fn ort_init() -> Result<(), ort::Error> {
    ort::init().with_name(env!("CARGO_PKG_NAME")).commit()
}
