//! Config for tablet channels.

use std::time::Duration;

use load_channel::TabletChannelOptions;

fn default_sliding_window_size() -> &'static str {
    let s = TabletChannelOptions::DEFAULT_SLIDING_WINDOW_SIZE.to_string();
    Box::leak(Box::new(s))
}

fn default_replica_poll_interval() -> &'static str {
    let s = humantime::format_duration(TabletChannelOptions::DEFAULT_REPLICA_POLL_INTERVAL)
        .to_string();
    Box::leak(Box::new(s))
}

fn default_replica_progress_log_interval() -> &'static str {
    let s = humantime::format_duration(
        TabletChannelOptions::DEFAULT_REPLICA_PROGRESS_LOG_INTERVAL,
    )
    .to_string();
    Box::leak(Box::new(s))
}

fn parse_sliding_window_size(s: &str) -> Result<usize, String> {
    let size: usize = s
        .parse()
        .map_err(|e| format!("invalid sliding window size '{s}': {e}"))?;
    if size < 2 {
        return Err(format!("sliding window size must be at least 2, got {size}"));
    }
    Ok(size)
}

/// CLI config for the tablet channels of a backend node.
#[derive(Debug, Clone, Copy, clap::Parser)]
pub struct TabletChannelConfig {
    /// Maximum distance, in packets, a sender may run ahead of its last contiguously completed
    /// packet.
    ///
    /// Packets further ahead are rejected and must be resent later.
    #[clap(
        long = "tablet-channel-sliding-window-size",
        env = "LOAD_TABLET_CHANNEL_SLIDING_WINDOW_SIZE",
        default_value = default_sliding_window_size(),
        value_parser = parse_sliding_window_size,
        action
    )]
    pub sliding_window_size: usize,

    /// How often the state of secondary replicas is checked while closing a replicated
    /// channel.
    #[clap(
        long = "tablet-channel-replica-poll-interval",
        env = "LOAD_TABLET_CHANNEL_REPLICA_POLL_INTERVAL",
        default_value = default_replica_poll_interval(),
        value_parser = humantime::parse_duration,
    )]
    pub replica_poll_interval: Duration,

    /// How often to log that a channel is still waiting on a secondary replica.
    #[clap(
        long = "tablet-channel-replica-progress-log-interval",
        env = "LOAD_TABLET_CHANNEL_REPLICA_PROGRESS_LOG_INTERVAL",
        default_value = default_replica_progress_log_interval(),
        value_parser = humantime::parse_duration,
    )]
    pub replica_progress_log_interval: Duration,
}

impl TabletChannelConfig {
    /// The channel options described by this config.
    pub fn options(&self) -> TabletChannelOptions {
        TabletChannelOptions {
            sliding_window_size: self.sliding_window_size,
            replica_poll_interval: self.replica_poll_interval,
            replica_progress_log_interval: self.replica_progress_log_interval,
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn defaults_match_channel_defaults() {
        let config = TabletChannelConfig::try_parse_from(["server"]).unwrap();
        assert_eq!(config.options(), TabletChannelOptions::default());
    }

    #[test]
    fn parse_overrides() {
        let config = TabletChannelConfig::try_parse_from([
            "server",
            "--tablet-channel-sliding-window-size",
            "8",
            "--tablet-channel-replica-poll-interval",
            "50ms",
            "--tablet-channel-replica-progress-log-interval",
            "2m",
        ])
        .unwrap();
        let options = config.options();
        assert_eq!(options.sliding_window_size, 8);
        assert_eq!(options.replica_poll_interval, Duration::from_millis(50));
        assert_eq!(
            options.replica_progress_log_interval,
            Duration::from_secs(120)
        );
    }

    #[test]
    fn reject_tiny_window() {
        let err = TabletChannelConfig::try_parse_from([
            "server",
            "--tablet-channel-sliding-window-size",
            "1",
        ])
        .unwrap_err();
        assert!(
            err.to_string().contains("sliding window size must be at least 2"),
            "{err}"
        );
    }
}
