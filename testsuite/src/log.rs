pub(crate) const TARGET: &str = "tycho_testsuite";

/// One line per dispatched message.
pub const VERBOSITY_DISPATCH: u8 = 1;
/// Actions, emitted messages and events.
pub const VERBOSITY_ACTIONS: u8 = 3;
/// Raw bodies and bridge inputs.
pub const VERBOSITY_TRACE: u8 = 5;

macro_rules! ts_log_dispatch {
    ($verbosity:expr, $($tt:tt)*) => {
        if $verbosity >= $crate::log::VERBOSITY_DISPATCH {
            tracing::info!(target: $crate::log::TARGET, $($tt)*);
        }
    };
}

macro_rules! ts_log_action {
    ($verbosity:expr, $($tt:tt)*) => {
        if $verbosity >= $crate::log::VERBOSITY_ACTIONS {
            tracing::debug!(target: $crate::log::TARGET, $($tt)*);
        }
    };
}

macro_rules! ts_log_trace {
    ($verbosity:expr, $($tt:tt)*) => {
        if $verbosity >= $crate::log::VERBOSITY_TRACE {
            tracing::trace!(target: $crate::log::TARGET, $($tt)*);
        }
    };
}

/// Short form of an address for log lines, prefers a nickname.
pub(crate) struct AddrLabel<'a> {
    pub address: &'a tycho_testsuite_abi::Address,
    pub nickname: Option<&'a str>,
}

impl std::fmt::Display for AddrLabel<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.nickname, self.address) {
            (Some(name), _) => f.write_str(name),
            (None, tycho_testsuite_abi::Address::None) => f.write_str("<none>"),
            (None, address) => {
                let s = address.to_string();
                match s.split_once(':') {
                    Some((wc, id)) if id.len() > 8 => write!(f, "{wc}:{}..", &id[..8]),
                    _ => f.write_str(&s),
                }
            }
        }
    }
}
