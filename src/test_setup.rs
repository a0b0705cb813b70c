#[cfg(test)]
#[ctor::ctor]
fn init_tests() {
    // initialize a tracing subscriber only for tests
    let _ = tracing_subscriber::fmt().try_init();
}
