//! Runtime configuration.
//!
//! Every field is optional from the caller's perspective: [`Configuration::new`] (via `Default`)
//! fills in the documented defaults, and [`Configuration::from_args`] overrides them from process
//! arguments using `getopts`, mirroring the two construction paths of a communication layer's own
//! `Configuration` type.

use crate::error::{BuildError, BuildResult};

/// The fixed burst size the whole runtime is built around.
pub const BURST_SIZE: usize = 32;

/// Tunable knobs for a [`crate::lifecycle::System`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Configuration {
    /// Explicit CPU list to pin workers to; `None` means "pick automatically".
    pub cpu_list: Option<Vec<usize>>,
    /// Disables the adaptive scheduler; workers run with a single, fixed lane assignment.
    pub disable_scheduler: bool,
    /// Clones, once created, are never retired even if load drops.
    pub persistent_clones: bool,
    /// Runs the stop worker on a core of its own rather than sharing one.
    pub stop_on_dedicated_core: bool,
    /// Requests hardware TX checksum offload where the driver supports it.
    pub hw_tx_checksum: bool,
    /// Mbufs allocated per port.
    pub mbuf_count_per_port: u32,
    /// Per-core mbuf cache size.
    pub mbuf_cache_size: u32,
    /// Ring capacity, expressed as a multiple of [`BURST_SIZE`]. Must be a power of two.
    pub ring_size_multiplier: u32,
    /// Scheduler tick period, in milliseconds.
    pub sched_time_ms: u64,
    /// Interval between scheduler load checks, in milliseconds.
    pub check_interval_ms: u64,
    /// Interval between debug statistics prints, in milliseconds. Must be `>= sched_time_ms`.
    pub debug_print_ms: u64,
    /// Bitmask selecting which log categories are active; interpretation is caller-defined.
    pub log_type_mask: u64,
    /// Extra argv-style tokens passed through to the driver untouched.
    pub driver_argv: Vec<String>,
    /// Whether a kernel-bridge (KNI-style) device should be created where requested.
    pub need_kernel_bridge: bool,
    /// Maximum number of concurrent receive workers.
    pub max_simultaneous_receives: u32,
    /// Maximum number of parallel RSS lanes (`in_index`). Forced to 1 if the scheduler is disabled.
    pub max_in_index: u32,
    /// Disables cloning of segments that demand globally ordered delivery.
    pub restricted_cloning: bool,
}

impl Default for Configuration {
    fn default() -> Self {
        Configuration {
            cpu_list: None,
            disable_scheduler: false,
            persistent_clones: false,
            stop_on_dedicated_core: false,
            hw_tx_checksum: false,
            mbuf_count_per_port: 8191,
            mbuf_cache_size: 250,
            ring_size_multiplier: 64,
            sched_time_ms: 500,
            check_interval_ms: 10_000,
            debug_print_ms: 1_000,
            log_type_mask: 0,
            driver_argv: Vec::new(),
            need_kernel_bridge: false,
            max_simultaneous_receives: 2,
            max_in_index: 16,
            restricted_cloning: false,
        }
    }
}

impl Configuration {
    /// Builds a configuration with every default from the documented option table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a configuration from process-style arguments (e.g. `std::env::args()`).
    ///
    /// Recognized flags:
    /// `-c, --cpu` comma-separated CPU list; `--disable-scheduler`; `--persistent-clones`;
    /// `--hw-tx-checksum`; `-r, --ring-multiplier`; `-t, --sched-time`; `-i, --max-in-index`;
    /// `--restricted-cloning`.
    #[cfg(feature = "getopts")]
    pub fn from_args<I: Iterator<Item = String>>(args: I) -> BuildResult<Configuration> {
        let mut opts = getopts::Options::new();
        opts.optopt("c", "cpu", "comma-separated list of CPU cores to use", "LIST");
        opts.optflag("", "disable-scheduler", "disable the adaptive scheduler");
        opts.optflag("", "persistent-clones", "never retire a cloned worker");
        opts.optflag("", "hw-tx-checksum", "request hardware TX checksum offload");
        opts.optopt("r", "ring-multiplier", "ring size as a multiple of the burst size", "NUM");
        opts.optopt("t", "sched-time", "scheduler tick period in milliseconds", "MS");
        opts.optopt("i", "max-in-index", "maximum number of parallel RSS lanes", "NUM");
        opts.optflag("", "restricted-cloning", "disable cloning of order-sensitive segments");

        let matches = opts
            .parse(args)
            .map_err(|e| BuildError::BadArgument(e.to_string()))?;

        let mut config = Configuration::new();

        if let Some(list) = matches.opt_str("c") {
            let mut cpus = Vec::new();
            for tok in list.split(',') {
                let tok = tok.trim();
                if tok.is_empty() {
                    continue;
                }
                let cpu = tok
                    .parse::<usize>()
                    .map_err(|_| BuildError::BadArgument(format!("invalid cpu id: {tok}")))?;
                cpus.push(cpu);
            }
            config.cpu_list = Some(cpus);
        }

        config.disable_scheduler = matches.opt_present("disable-scheduler");
        config.persistent_clones = matches.opt_present("persistent-clones");
        config.hw_tx_checksum = matches.opt_present("hw-tx-checksum");
        config.restricted_cloning = matches.opt_present("restricted-cloning");

        if let Some(value) = matches.opt_str("r") {
            let multiplier = value
                .parse::<u32>()
                .map_err(|_| BuildError::BadArgument(format!("invalid ring multiplier: {value}")))?;
            if !multiplier.is_power_of_two() {
                return Err(BuildError::BadArgument(
                    "ring multiplier must be a power of two".into(),
                ));
            }
            config.ring_size_multiplier = multiplier;
        }

        if let Some(value) = matches.opt_str("t") {
            config.sched_time_ms = value
                .parse()
                .map_err(|_| BuildError::BadArgument(format!("invalid sched time: {value}")))?;
        }

        if let Some(value) = matches.opt_str("i") {
            config.max_in_index = value
                .parse()
                .map_err(|_| BuildError::BadArgument(format!("invalid max in-index: {value}")))?;
        }

        if config.disable_scheduler {
            config.max_in_index = 1;
        }

        if config.debug_print_ms < config.sched_time_ms {
            config.debug_print_ms = config.sched_time_ms;
        }

        Ok(config)
    }

    /// Ring capacity in mbufs, derived from [`BURST_SIZE`] and [`Configuration::ring_size_multiplier`].
    pub fn ring_capacity(&self) -> usize {
        BURST_SIZE * self.ring_size_multiplier as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_table() {
        let config = Configuration::new();
        assert_eq!(config.mbuf_count_per_port, 8191);
        assert_eq!(config.mbuf_cache_size, 250);
        assert_eq!(config.ring_size_multiplier, 64);
        assert_eq!(config.sched_time_ms, 500);
        assert_eq!(config.check_interval_ms, 10_000);
        assert_eq!(config.debug_print_ms, 1_000);
        assert_eq!(config.max_simultaneous_receives, 2);
        assert_eq!(config.max_in_index, 16);
        assert!(!config.restricted_cloning);
    }

    #[test]
    fn ring_capacity_is_burst_times_multiplier() {
        let config = Configuration::new();
        assert_eq!(config.ring_capacity(), 32 * 64);
    }

    #[cfg(feature = "getopts")]
    #[test]
    fn disabling_scheduler_forces_single_lane() {
        let args = vec!["--disable-scheduler".to_string()];
        let config = Configuration::from_args(args.into_iter()).unwrap();
        assert_eq!(config.max_in_index, 1);
    }

    #[cfg(feature = "getopts")]
    #[test]
    fn rejects_non_power_of_two_ring_multiplier() {
        let args = vec!["-r".to_string(), "17".to_string()];
        assert!(Configuration::from_args(args.into_iter()).is_err());
    }
}
