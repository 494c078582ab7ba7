use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Context;
use everscale_types::error::Error;
use everscale_types::models::StateInit;
use everscale_types::num::Tokens;
use everscale_types::prelude::*;
use tycho_testsuite_abi::{Abi, Address, CellExt, Signer};

use crate::error::{HarnessError, HarnessResult};
use crate::log::AddrLabel;

/// Code and initial data of a contract.
#[derive(Debug, Clone, PartialEq)]
pub struct ContractImage {
    pub code: Cell,
    pub data: Cell,
}

impl ContractImage {
    pub fn new(code: Cell, data: Cell) -> Self {
        Self { code, data }
    }

    /// Loads an image from a serialized `StateInit` (a `.tvc` file).
    pub fn from_boc(bytes: &[u8]) -> HarnessResult<Self> {
        let root = Cell::from_boc(bytes)?;
        let state_init = StateInit::load_from(&mut root.as_slice()?)?;
        let code = state_init.code.context("contract image has no code")?;
        Ok(Self {
            code,
            data: state_init.data.unwrap_or_else(Cell::empty_cell),
        })
    }

    pub fn with_data(mut self, data: Cell) -> Self {
        self.data = data;
        self
    }

    pub fn state_init(&self) -> StateInit {
        StateInit {
            code: Some(self.code.clone()),
            data: Some(self.data.clone()),
            ..Default::default()
        }
    }

    pub fn to_cell(&self) -> Result<Cell, Error> {
        CellBuilder::build_from(&self.state_init())
    }

    /// Address derived from the `StateInit` hash.
    pub fn address(&self, workchain: i8) -> Result<Address, Error> {
        Ok(Address::std(workchain, *self.to_cell()?.repr_hash()))
    }
}

/// Deployed contract.
#[derive(Debug, Clone)]
pub struct ContractInstance {
    pub address: Address,
    pub code: Cell,
    pub data: Cell,
    pub balance: Tokens,
    pub abi: Option<Arc<Abi>>,
    pub nickname: Option<String>,
    /// Signs external calls to this contract.
    pub signer: Option<Signer>,
    /// Artifact name the contract was loaded from.
    pub name: Option<String>,
    /// Logical time of the last execution.
    pub last_lt: u64,
    /// Set when the contract sent a message with the delete flag.
    pub destroy_requested: bool,
}

impl ContractInstance {
    pub fn new(address: Address, image: ContractImage, balance: Tokens) -> Self {
        Self {
            address,
            code: image.code,
            data: image.data,
            balance,
            abi: None,
            nickname: None,
            signer: None,
            name: None,
            last_lt: 0,
            destroy_requested: false,
        }
    }

    pub fn image(&self) -> ContractImage {
        ContractImage::new(self.code.clone(), self.data.clone())
    }
}

/// Address or nickname of a contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Address(Address),
    Nickname(String),
}

impl From<Address> for Target {
    fn from(value: Address) -> Self {
        Self::Address(value)
    }
}

impl From<&Address> for Target {
    fn from(value: &Address) -> Self {
        Self::Address(*value)
    }
}

impl From<&str> for Target {
    fn from(value: &str) -> Self {
        match value.parse::<Address>() {
            Ok(address) if !address.is_none() => Self::Address(address),
            _ => Self::Nickname(value.to_owned()),
        }
    }
}

impl From<String> for Target {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

/// Contracts, nicknames, parked balances and known ABIs.
#[derive(Debug, Default)]
pub struct Registry {
    contracts: BTreeMap<Address, ContractInstance>,
    nicknames: BTreeMap<String, Address>,
    parked: BTreeMap<Address, Tokens>,
    abis: Vec<Arc<Abi>>,
}

impl Registry {
    /// Adds a contract.
    ///
    /// Value parked at the address is added to the contract balance.
    /// With `override_existing` the previous entry is replaced but its
    /// nickname is kept unless a new one is given.
    pub fn insert(
        &mut self,
        mut instance: ContractInstance,
        override_existing: bool,
    ) -> HarnessResult<()> {
        let address = instance.address;
        if let Some(existing) = self.contracts.get(&address) {
            if !override_existing {
                return Err(HarnessError::DuplicateAddress(address));
            }
            if instance.nickname.is_none() {
                instance.nickname = existing.nickname.clone();
            }
        }

        if let Some(name) = &instance.nickname {
            self.check_nickname(&address, name)?;
        }

        if let Some(parked) = self.parked.get(&address) {
            instance.balance = instance
                .balance
                .checked_add(*parked)
                .ok_or(HarnessError::BalanceOverflow(address))?;
            self.parked.remove(&address);
        }

        if let Some(abi) = &instance.abi {
            self.register_abi(abi.clone());
        }
        if let Some(name) = instance.nickname.clone() {
            self.nicknames.retain(|_, bound| *bound != address);
            self.nicknames.insert(name, address);
        }
        self.contracts.insert(address, instance);
        Ok(())
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.contracts.contains_key(address)
    }

    pub fn get(&self, address: &Address) -> Option<&ContractInstance> {
        self.contracts.get(address)
    }

    pub fn contracts(&self) -> impl Iterator<Item = &ContractInstance> {
        self.contracts.values()
    }

    pub fn len(&self) -> usize {
        self.contracts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contracts.is_empty()
    }

    pub fn resolve(&self, target: &Target) -> HarnessResult<Address> {
        match target {
            Target::Address(address) => Ok(*address),
            Target::Nickname(name) => self
                .nicknames
                .get(name)
                .copied()
                .ok_or_else(|| HarnessError::UnknownNickname(name.clone())),
        }
    }

    pub fn lookup(&self, target: &Target) -> HarnessResult<&ContractInstance> {
        let address = self.resolve(target)?;
        self.contracts
            .get(&address)
            .ok_or(HarnessError::UnknownAddress(address))
    }

    fn lookup_mut(&mut self, target: &Target) -> HarnessResult<&mut ContractInstance> {
        let address = self.resolve(target)?;
        self.contracts
            .get_mut(&address)
            .ok_or(HarnessError::UnknownAddress(address))
    }

    /// Binds a nickname. Rebinding the same pair is a no-op.
    pub fn register_nickname(&mut self, address: Address, name: &str) -> HarnessResult<()> {
        self.check_nickname(&address, name)?;

        self.nicknames.retain(|_, bound| *bound != address);
        self.nicknames.insert(name.to_owned(), address);
        if let Some(contract) = self.contracts.get_mut(&address) {
            contract.nickname = Some(name.to_owned());
        }
        Ok(())
    }

    fn check_nickname(&self, address: &Address, name: &str) -> HarnessResult<()> {
        match self.nicknames.get(name) {
            Some(bound) if bound != address => Err(HarnessError::DuplicateNickname {
                name: name.to_owned(),
                address: *bound,
            }),
            _ => Ok(()),
        }
    }

    pub fn nickname_of(&self, address: &Address) -> Option<&str> {
        self.nicknames
            .iter()
            .find(|(_, bound)| *bound == address)
            .map(|(name, _)| name.as_str())
    }

    pub(crate) fn label<'a>(&'a self, address: &'a Address) -> AddrLabel<'a> {
        AddrLabel {
            address,
            nickname: self.nickname_of(address),
        }
    }

    /// Balance of a contract or value parked at an address.
    pub fn balance(&self, address: &Address) -> HarnessResult<Tokens> {
        if let Some(contract) = self.contracts.get(address) {
            return Ok(contract.balance);
        }
        self.parked
            .get(address)
            .copied()
            .ok_or(HarnessError::UnknownAddress(*address))
    }

    pub fn set_balance(&mut self, target: &Target, balance: Tokens) -> HarnessResult<()> {
        self.lookup_mut(target)?.balance = balance;
        Ok(())
    }

    pub fn set_abi(&mut self, target: &Target, abi: Arc<Abi>) -> HarnessResult<()> {
        self.lookup_mut(target)?.abi = Some(abi.clone());
        self.register_abi(abi);
        Ok(())
    }

    pub fn set_code(&mut self, target: &Target, code: Cell) -> HarnessResult<()> {
        self.lookup_mut(target)?.code = code;
        Ok(())
    }

    pub fn set_data(&mut self, target: &Target, data: Cell) -> HarnessResult<()> {
        self.lookup_mut(target)?.data = data;
        Ok(())
    }

    pub fn set_signer(&mut self, target: &Target, signer: Option<Signer>) -> HarnessResult<()> {
        self.lookup_mut(target)?.signer = signer;
        Ok(())
    }

    /// Makes an ABI available for decoding, replacing one with the same name.
    pub fn register_abi(&mut self, abi: Arc<Abi>) {
        match self.abis.iter_mut().find(|known| known.name() == abi.name()) {
            Some(known) => *known = abi,
            None => self.abis.push(abi),
        }
    }

    pub fn known_abis(&self) -> &[Arc<Abi>] {
        &self.abis
    }

    pub fn find_abi(&self, name: &str) -> Option<&Arc<Abi>> {
        self.abis.iter().find(|abi| abi.name() == name)
    }

    /// Keeps value sent to a missing address.
    pub fn park(&mut self, address: Address, value: Tokens) -> HarnessResult<()> {
        let slot = self.parked.entry(address).or_default();
        *slot = slot
            .checked_add(value)
            .ok_or(HarnessError::BalanceOverflow(address))?;
        Ok(())
    }

    pub fn parked(&self, address: &Address) -> Option<Tokens> {
        self.parked.get(address).copied()
    }

    pub(crate) fn take_parked(&mut self, address: &Address) -> Option<Tokens> {
        self.parked.remove(address)
    }

    /// Sum of contract balances and parked value, `None` on overflow.
    pub fn total_balance(&self) -> Option<u128> {
        let contracts = self.contracts.values().map(|c| c.balance.into_inner());
        let parked = self.parked.values().map(|t| t.into_inner());
        contracts
            .chain(parked)
            .try_fold(0u128, |total, value| total.checked_add(value))
    }

    /// Stores the result of a committed dispatch.
    pub(crate) fn replace(&mut self, instance: ContractInstance) {
        self.contracts.insert(instance.address, instance);
    }

    pub(crate) fn clear(&mut self) {
        self.contracts.clear();
        self.nicknames.clear();
        self.parked.clear();
        self.abis.clear();
    }
}
