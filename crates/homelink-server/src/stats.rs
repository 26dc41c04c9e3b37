//! RRD statistics — user/session gauges and api/event counters, flushed
//! every 10 seconds through the rrdtool CLI. All invocations are
//! fire-and-forget; a missing rrdtool just logs at debug.

use homelink_api::registry::UserRegistry;
use homelink_api::stats::Stats;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;

const STEP: u64 = 10;

fn spawn(program: &str, args: Vec<String>) {
    match Command::new(program)
        .args(&args)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()
    {
        Ok(_) => {}
        Err(error) => tracing::debug!("Failed to run {program}: {error}"),
    }
}

fn update(path: &str, name: &str, time: i64, value: u64) {
    let file = format!("{path}/{name}.rrd");

    spawn(
        "rrdcreate",
        vec![
            file.clone(),
            "--no-overwrite".into(),
            "--step".into(),
            STEP.to_string(),
            "DS:data:GAUGE:3600:U:U".into(),
            "RRA:AVERAGE:0.5:1:8640".into(),
            "RRA:AVERAGE:0.5:60:1008".into(),
            "RRA:AVERAGE:0.5:360:744".into(),
            "RRA:AVERAGE:0.5:2160:1460".into(),
        ],
    );

    spawn("rrdupdate", vec![file, format!("{time}:{value}")]);
}

/// Periodic statistics flush.
pub async fn run(path: String, registry: Arc<UserRegistry>, stats: Arc<Stats>) {
    let mut tick = tokio::time::interval(Duration::from_secs(STEP));

    loop {
        tick.tick().await;

        let time = unix_now();
        let time = time - time % STEP as i64;
        let (users, sessions) = registry.counts();
        let (api, events) = stats.take();

        update(&path, "user", time, users as u64);
        update(&path, "client", time, sessions as u64);
        update(&path, "api", time, api);
        update(&path, "event", time, events);
    }
}

fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|duration| duration.as_secs() as i64)
        .unwrap_or_default()
}
