#![allow(clippy::cognitive_complexity)]
use anyhow::{Result, anyhow};

use config::ClusterConfig;
use duet_bin::Cluster;
use duet_core::{
    config::{
        cli::{self, Parser},
        trace,
    },
    sim::paced::{self, Finish},
    tokio::{self, runtime::Builder, signal},
    tracing::*,
};
use tokio_util::sync::CancellationToken;

fn main() -> Result<()> {
    // parses from cli or environment var
    let config = cli::Config::parse();
    let trace_config = trace::Config::parse(&config.duet_log)?;
    debug!(?config, ?trace_config);
    if let Err(err) = dotenv::dotenv() {
        debug!(?err, ".env file not loaded");
    }

    debug!("parsing cluster config");
    let cluster_cfg = ClusterConfig::parse(&config.config_path)?;
    let mut cluster = Cluster::build(&cluster_cfg)?;
    let until = config.run_for().unwrap_or_else(|| cluster.run_for());
    info!(
        servers = cluster_cfg.servers().len(),
        devices = cluster_cfg.devices().len(),
        ?until,
        realtime = config.realtime,
        "starting run"
    );

    if config.realtime {
        let rt = Builder::new_current_thread().enable_all().build()?;
        let token = CancellationToken::new();
        let finish = rt.block_on(async {
            let ctrl_c = tokio::spawn(shutdown_signal(token.clone()));
            let finish = paced::run(cluster.world_mut(), until, config.speed, token).await;
            ctrl_c.abort();
            finish
        });
        if let Finish::Cancelled(at) = finish {
            warn!(?at, "run interrupted, reporting partial results");
        }
    } else {
        let events = cluster.run_until(until);
        debug!(events, "run complete");
    }

    let report = cluster.report();
    report.log();
    if config.json {
        println!("{}", report.to_json()?);
    }
    Ok(())
}

async fn shutdown_signal(token: CancellationToken) -> Result<()> {
    let ret = signal::ctrl_c().await.map_err(|err| anyhow!(err));
    token.cancel();
    ret
}
