use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use everscale_types::cell::Cell;
use serde::{Deserialize, Serialize};
use tycho_testsuite_abi::CellExt;

/// Harness settings. Survive [`Session::reset_all`].
///
/// [`Session::reset_all`]: crate::Session::reset_all
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Diagnostics level: `0` silent, `1` dispatches, `3` actions, `5` raw data.
    pub verbosity: u8,
    /// Which failed dispatches halt [`dispatch_all`].
    ///
    /// [`dispatch_all`]: crate::Session::dispatch_all
    pub crash_policy: CrashPolicy,
    /// What to do with a non-bounceable message to a missing address.
    pub undeliverable: UndeliverablePolicy,
    /// Whether driver calls dispatch the produced messages.
    pub call_dispatch: CallDispatch,
    /// Charge `gas_used * gas_price` from contracts.
    pub gas_fee: bool,
    pub gas_price: u64,
    /// Gas limit passed to the bridge.
    pub gas_limit: u64,
    /// Flat fee taken from every bounced message value.
    pub bounce_fee: u64,
    /// Seconds added to `now` for the `expire` header.
    pub expire_timeout: u32,
    /// Default workchain of deployed contracts.
    pub workchain: i8,
    /// Directory with `.tvc` and `.abi.json` artifacts.
    pub artifacts_path: PathBuf,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            verbosity: 0,
            crash_policy: CrashPolicy::AnyFailure,
            undeliverable: UndeliverablePolicy::Fail,
            call_dispatch: CallDispatch::Manual,
            gas_fee: true,
            gas_price: 1000,
            gas_limit: 1_000_000,
            bounce_fee: 0,
            expire_timeout: 60,
            workchain: 0,
            artifacts_path: PathBuf::from("."),
        }
    }
}

/// Selects failed dispatches that stop the dispatch loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrashPolicy {
    /// Failures are recorded and the loop goes on.
    Never,
    /// Any non-success exit code stops the loop.
    AnyFailure,
    /// Only the listed exit codes stop the loop.
    ExitCodes(BTreeSet<i32>),
}

impl CrashPolicy {
    pub fn exit_codes<I: IntoIterator<Item = i32>>(codes: I) -> Self {
        Self::ExitCodes(codes.into_iter().collect())
    }

    pub fn matches(&self, exit_code: i32) -> bool {
        match self {
            Self::Never => false,
            Self::AnyFailure => true,
            Self::ExitCodes(codes) => codes.contains(&exit_code),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UndeliverablePolicy {
    /// Report an error and keep the message at the queue head.
    Fail,
    /// Consume the message and park its value at the address.
    Park,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallDispatch {
    /// Produced messages stay in the queue.
    Manual,
    /// Dispatch a single message after the call.
    One,
    /// Dispatch until the queue is drained or the crash policy stops.
    All,
}

/// Blockchain config parameters visible to contracts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigParams {
    params: BTreeMap<u32, Cell>,
}

impl ConfigParams {
    /// Sets a parameter. An empty cell removes it.
    pub fn set(&mut self, index: u32, value: Cell) {
        if value.is_empty_cell() {
            self.params.remove(&index);
        } else {
            self.params.insert(index, value);
        }
    }

    pub fn get(&self, index: u32) -> Option<&Cell> {
        self.params.get(&index)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &Cell)> {
        self.params.iter().map(|(index, cell)| (*index, cell))
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn clear(&mut self) {
        self.params.clear();
    }
}

#[cfg(test)]
mod tests {
    use everscale_types::prelude::*;

    use super::*;

    #[test]
    fn empty_cell_removes_param() -> anyhow::Result<()> {
        let mut params = ConfigParams::default();
        params.set(34, CellBuilder::build_from(123u32)?);
        assert_eq!(params.len(), 1);
        assert!(params.get(34).is_some());

        params.set(34, Cell::empty_cell());
        assert!(params.is_empty());
        Ok(())
    }

    #[test]
    fn crash_policy() {
        assert!(!CrashPolicy::Never.matches(100));
        assert!(CrashPolicy::AnyFailure.matches(100));

        let policy = CrashPolicy::exit_codes([100, 101]);
        assert!(policy.matches(101));
        assert!(!policy.matches(102));
    }

    #[test]
    fn config_from_json() {
        let config: SessionConfig = serde_json::from_value(serde_json::json!({
            "verbosity": 3,
            "crash_policy": { "exit_codes": [51] },
            "undeliverable": "park",
        }))
        .unwrap();

        assert_eq!(config.verbosity, 3);
        assert!(config.crash_policy.matches(51));
        assert_eq!(config.undeliverable, UndeliverablePolicy::Park);
        assert_eq!(config.gas_price, SessionConfig::default().gas_price);
    }
}
