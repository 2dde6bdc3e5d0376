//! Transaction kinds carried by client proofs.

use serde::{Deserialize, Serialize};

/// The kind of operation a client proof performs.
///
/// The discriminant doubles as the wire tag in the proof data and as the
/// index into per-asset gas constant tables, so the order here is fixed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum TxType {
    Deposit = 0,
    Transfer = 1,
    WithdrawToWallet = 2,
    WithdrawToContract = 3,
    Account = 4,
    DefiDeposit = 5,
    DefiClaim = 6,
}

/// All transaction kinds in canonical (wire/fee-table) order.
pub const TX_TYPES: [TxType; 7] = [
    TxType::Deposit,
    TxType::Transfer,
    TxType::WithdrawToWallet,
    TxType::WithdrawToContract,
    TxType::Account,
    TxType::DefiDeposit,
    TxType::DefiClaim,
];

impl TxType {
    /// Parse a wire tag.
    pub fn from_tag(tag: u8) -> Option<Self> {
        TX_TYPES.get(tag as usize).copied()
    }

    /// Index into per-tx-type tables (gas constants, fee quotes).
    pub fn index(self) -> usize {
        self as usize
    }
}
