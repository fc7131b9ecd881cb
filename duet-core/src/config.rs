//! process-level configuration

pub mod cli {
    //! Parse from either cli or env var

    /// the default path to config
    pub static DEFAULT_CONFIG_PATH: &str = "/etc/duet/config.yaml";
    /// default log level. Can use this argument or DUET_LOG env var
    pub const DEFAULT_DUET_LOG: &str = "info";
    /// default wall clock speed multiplier when pacing in real time
    pub const DEFAULT_SPEED: f64 = 1.0;

    use std::{path::PathBuf, time::Duration};

    pub use clap::Parser;

    #[derive(Parser, Debug, Clone, PartialEq)]
    #[clap(author, name = "duet", bin_name = "duet", about, long_about = None)]
    /// parses from cli & environment var. duet will load `.env` in the working dir as well
    pub struct Config {
        /// path to the cluster config (yaml or json)
        #[clap(
            short,
            long,
            value_parser,
            env,
            default_value = DEFAULT_CONFIG_PATH
        )]
        pub config_path: PathBuf,
        /// set the log level. All valid RUST_LOG arguments are accepted
        #[clap(long, env, value_parser, default_value = DEFAULT_DUET_LOG)]
        pub duet_log: String,
        /// override the logical run length from the config file (ms)
        #[clap(long, env, value_parser)]
        pub run_for_ms: Option<u64>,
        /// print the end of run report as json on stdout
        #[clap(long, env, value_parser, default_value_t = false)]
        pub json: bool,
        /// pace the logical clock against the wall clock instead of running
        /// as fast as possible
        #[clap(long, env, value_parser, default_value_t = false)]
        pub realtime: bool,
        /// wall clock speed multiplier used with `--realtime`
        #[clap(long, env, value_parser, default_value_t = DEFAULT_SPEED)]
        pub speed: f64,
    }

    impl Config {
        /// run length override as a `Duration`
        pub fn run_for(&self) -> Option<Duration> {
            self.run_for_ms.map(Duration::from_millis)
        }
    }

}

pub mod trace {
    //! tracing configuration
    use anyhow::Result;
    use tracing_subscriber::{
        filter::EnvFilter,
        fmt::{
            self,
            format::{Format, PrettyFields},
        },
        prelude::__tracing_subscriber_SubscriberExt,
        util::SubscriberInitExt,
    };

    use crate::env::parse_var_with_err;

    /// log as "json", "pretty" or "standard" (unstructured)
    static DEFAULT_LOG_FORMAT: &str = "standard";

    /// Configuration for the tracing subscriber
    #[derive(Debug)]
    pub struct Config {
        /// formatting to apply to logs
        pub log_frmt: String,
    }

    impl Config {
        /// install the global subscriber; level comes from DUET_LOG
        pub fn parse(duet_log: &str) -> Result<Self> {
            let log_frmt: String = parse_var_with_err("LOG_FORMAT", DEFAULT_LOG_FORMAT)?;

            let filter = EnvFilter::try_new(duet_log).or_else(|_| EnvFilter::try_new("info"))?;

            match &log_frmt[..] {
                "json" => {
                    tracing_subscriber::registry()
                        .with(filter)
                        .with(fmt::layer().json())
                        .init();
                }
                "pretty" => {
                    tracing_subscriber::registry()
                        .with(filter)
                        .with(
                            fmt::layer()
                                .event_format(
                                    Format::default().pretty().with_source_location(false),
                                )
                                .fmt_fields(PrettyFields::new()),
                        )
                        .init();
                }
                _ => {
                    tracing_subscriber::registry()
                        .with(filter)
                        .with(fmt::layer())
                        .init();
                }
            }

            Ok(Self { log_frmt })
        }
    }
}
