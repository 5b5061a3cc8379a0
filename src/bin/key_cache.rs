use std::collections::HashMap;

use key_cache::{Config, start_app};

fn main() {
    // The AWS SDK probes EC2 instance metadata unless told otherwise,
    // which stalls startup anywhere that endpoint doesn't exist. Safety:
    // no other threads are running this early, so mutating the process
    // environment cannot race.
    unsafe { std::env::set_var("AWS_EC2_METADATA_DISABLED", "true") };

    // Scope the env snapshot so it's gone before the server starts.
    let config = {
        let vars: HashMap<String, String> = std::env::vars().collect();
        Config::from_env(&vars)
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.worker_threads)
        .thread_stack_size(2 * 1024 * 1024)
        .enable_all()
        .build()
        .expect("failed to build tokio runtime");

    if let Err(error) = runtime.block_on(start_app(config)) {
        eprintln!("key-cache failed: {error}");
        std::process::exit(1);
    }
}
