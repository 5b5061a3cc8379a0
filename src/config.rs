use std::{
    collections::HashMap,
    fmt::{Display, Formatter},
    net::SocketAddr,
    path::PathBuf,
};

pub struct Config {
    pub listen_addr: SocketAddr,
    pub cache_dir: PathBuf,
    pub scratch_dir: PathBuf,
    pub cache_max_bytes: u64,
    pub upstream_endpoint: Option<String>,
    pub upstream_region: String,
    pub upstream_access_key_id: Option<String>,
    pub upstream_secret_access_key: Option<String>,
    pub otel_grpc_endpoint_url: Option<String>,
    pub prometheus_textfile_dir: Option<String>,
    pub worker_threads: usize,
}

impl Config {
    pub fn from_env(vars: &HashMap<String, String>) -> Self {
        let config = Self {
            listen_addr: vars
                .get("LISTEN_ADDR")
                .map(|s| s.parse().expect("invalid LISTEN_ADDR"))
                .unwrap_or_else(|| "0.0.0.0:8780".parse().unwrap()),
            cache_dir: vars
                .get("CACHE_DIR")
                .map(PathBuf::from)
                .expect("CACHE_DIR is required"),
            scratch_dir: vars
                .get("SCRATCH_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(std::env::temp_dir),
            cache_max_bytes: vars
                .get("CACHE_MAX_BYTES")
                .map(|s| s.parse().expect("invalid CACHE_MAX_BYTES"))
                .unwrap_or(10_737_418_240),
            upstream_endpoint: vars.get("UPSTREAM_ENDPOINT").cloned(),
            upstream_region: vars
                .get("UPSTREAM_REGION")
                .cloned()
                .unwrap_or_else(|| "us-east-1".to_string()),
            upstream_access_key_id: vars.get("UPSTREAM_ACCESS_KEY_ID").cloned(),
            upstream_secret_access_key: vars.get("UPSTREAM_SECRET_ACCESS_KEY").cloned(),
            otel_grpc_endpoint_url: vars.get("OTEL_GRPC_ENDPOINT_URL").cloned(),
            prometheus_textfile_dir: vars.get("PROMETHEUS_TEXTFILE_DIR").cloned(),
            worker_threads: vars
                .get("WORKER_THREADS")
                .map(|s| s.parse().expect("invalid WORKER_THREADS"))
                .unwrap_or(4),
        };

        config.validate();
        config
    }

    fn validate(&self) {
        if self.cache_max_bytes == 0 {
            panic!("Invalid configuration: cache_max_bytes must be greater than 0");
        }

        if self.cache_dir.as_os_str().is_empty() {
            panic!("Invalid configuration: cache_dir must not be empty");
        }

        if self.upstream_access_key_id.is_some() != self.upstream_secret_access_key.is_some() {
            panic!(
                "Invalid configuration: UPSTREAM_ACCESS_KEY_ID and UPSTREAM_SECRET_ACCESS_KEY \
                 must be set together"
            );
        }

        if self.worker_threads == 0 {
            panic!("Invalid configuration: worker_threads must be greater than 0");
        }
    }
}

impl Display for Config {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Config{{ listen_addr: {}, cache_dir: {}, scratch_dir: {}, cache_max_bytes: {}, \
             upstream_endpoint: {:?}, upstream_region: {}, otel_grpc_endpoint_url: {:?}, \
             worker_threads: {} }}",
            self.listen_addr,
            self.cache_dir.display(),
            self.scratch_dir.display(),
            self.cache_max_bytes,
            self.upstream_endpoint,
            self.upstream_region,
            self.otel_grpc_endpoint_url,
            self.worker_threads,
        )
    }
}
