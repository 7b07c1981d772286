//! Redemption engine: redeemable-asset registry and proportional payouts.
//!
//! This module has no knowledge of accounts or CPI. Everything it needs from
//! the outside world comes in through the capability traits below, so the
//! wrapper decides what "is an asset", who is authorized, and where balances
//! come from.
//!
//! Guarantees:
//! 1. The registry never holds duplicates, the zero address, or more than
//!    `limit` entries.
//! 2. A failed mutation leaves the registry untouched.
//! 3. Payouts are `floor(balance * amount / supply)` per asset; the sum paid
//!    never exceeds the holder's proportional share of any asset.

use alloc::vec::Vec;
use bytemuck::{Pod, Zeroable};

// ============================================================================
// Constants
// ============================================================================

/// Storage capacity of the registry record.
///
/// The per-instance limit chosen at initialization may be lower.
pub const MAX_REDEEMABLE_TOKENS: usize = 16;

pub type Address = [u8; 32];

pub const ZERO_ADDRESS: Address = [0; 32];

// ============================================================================
// Errors
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RedemptionError {
    /// Address is not a deployed token
    InvalidAsset,

    /// Address is already registered (or repeated in the initial list)
    DuplicateAsset,

    /// Removal target is not registered
    AssetNotFound,

    /// Registry is at its limit
    RegistryFull,

    /// Redemption of zero units
    ZeroAmount,

    /// Holder balance below the requested amount
    InsufficientBalance,

    /// Every payout rounds to zero
    NoEligibleAssets,

    /// Caller may not manage the registry
    Unauthorized,

    /// Registry limit outside `1..=MAX_REDEEMABLE_TOKENS`
    InvalidLimit,

    /// Arithmetic overflow
    Overflow,
}

pub type Result<T> = core::result::Result<T, RedemptionError>;

// ============================================================================
// Capabilities
// ============================================================================

/// Answers whether an address refers to a deployed token.
pub trait AssetCheck {
    fn is_asset(&self, address: &Address) -> bool;
}

/// Governance permission check for registry mutation.
pub trait Authority {
    fn is_authorized(&self, caller: &Address) -> bool;
}

/// Read side of the shared vault.
pub trait Vault {
    /// Balance of `asset` held by the vault.
    fn balance_of(&self, asset: &Address) -> Result<u64>;
}

/// Read side of the redemption token.
pub trait RedemptionToken {
    fn balance_of(&self, holder: &Address) -> u64;
    fn total_supply(&self) -> u64;
}

// ============================================================================
// Registry
// ============================================================================

/// Ordered, duplicate-free set of redeemable assets.
///
/// Laid out for direct storage in account data.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct Registry {
    /// Number of occupied slots in `tokens`
    pub len: u64,

    /// Maximum number of entries for this instance
    pub limit: u64,

    pub tokens: [Address; MAX_REDEEMABLE_TOKENS],
}

impl Registry {
    /// Empty registry bounded by `limit`.
    pub fn new(limit: u64) -> Result<Self> {
        if limit == 0 || limit > MAX_REDEEMABLE_TOKENS as u64 {
            return Err(RedemptionError::InvalidLimit);
        }
        Ok(Self {
            len: 0,
            limit,
            tokens: [ZERO_ADDRESS; MAX_REDEEMABLE_TOKENS],
        })
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn limit(&self) -> usize {
        self.limit as usize
    }

    /// Registered assets in registry order.
    pub fn tokens(&self) -> &[Address] {
        let len = core::cmp::min(self.len(), MAX_REDEEMABLE_TOKENS);
        &self.tokens[..len]
    }

    pub fn contains(&self, token: &Address) -> bool {
        self.position(token).is_some()
    }

    fn position(&self, token: &Address) -> Option<usize> {
        self.tokens().iter().position(|t| t == token)
    }

    /// Validate and append. Shared by `add` and initialization seeding.
    fn push_checked<C: AssetCheck>(&mut self, check: &C, token: &Address) -> Result<()> {
        if *token == ZERO_ADDRESS || !check.is_asset(token) {
            return Err(RedemptionError::InvalidAsset);
        }
        if self.contains(token) {
            return Err(RedemptionError::DuplicateAsset);
        }
        if self.len >= self.limit {
            return Err(RedemptionError::RegistryFull);
        }

        self.tokens[self.len()] = *token;
        self.len += 1;
        Ok(())
    }

    /// Register `token` as redeemable.
    pub fn add<A: Authority, C: AssetCheck>(
        &mut self,
        auth: &A,
        caller: &Address,
        check: &C,
        token: &Address,
    ) -> Result<()> {
        if !auth.is_authorized(caller) {
            return Err(RedemptionError::Unauthorized);
        }
        self.push_checked(check, token)
    }

    /// Unregister `token`. The last entry takes its slot.
    pub fn remove<A: Authority>(
        &mut self,
        auth: &A,
        caller: &Address,
        token: &Address,
    ) -> Result<()> {
        if !auth.is_authorized(caller) {
            return Err(RedemptionError::Unauthorized);
        }
        let idx = self.position(token).ok_or(RedemptionError::AssetNotFound)?;

        let last = self.len() - 1;
        self.tokens[idx] = self.tokens[last];
        self.tokens[last] = ZERO_ADDRESS;
        self.len -= 1;
        Ok(())
    }
}

/// Build the registry for a new instance.
///
/// Validates the redemption token and every initial entry before anything is
/// returned; a failure yields no registry at all.
pub fn initialize<C: AssetCheck>(
    check: &C,
    redemption_token: &Address,
    initial_tokens: &[Address],
    limit: u64,
) -> Result<Registry> {
    if *redemption_token == ZERO_ADDRESS || !check.is_asset(redemption_token) {
        return Err(RedemptionError::InvalidAsset);
    }

    let mut registry = Registry::new(limit)?;
    if initial_tokens.len() as u64 > limit {
        return Err(RedemptionError::RegistryFull);
    }
    for token in initial_tokens {
        registry.push_checked(check, token)?;
    }
    Ok(registry)
}

// ============================================================================
// Redemption
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Payout {
    pub asset: Address,
    pub amount: u64,
}

/// Outcome of a validated redemption, computed before anything moves.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RedemptionPlan {
    /// Redemption tokens to burn
    pub amount: u64,

    /// Supply the payouts were computed against
    pub total_supply: u64,

    /// One entry per registered asset, in registry order, zeros included
    pub payouts: Vec<Payout>,
}

impl RedemptionPlan {
    /// Payouts that actually move tokens.
    pub fn transfers(&self) -> impl Iterator<Item = &Payout> {
        self.payouts.iter().filter(|p| p.amount > 0)
    }

    pub fn payout_for(&self, asset: &Address) -> Option<u64> {
        self.payouts.iter().find(|p| p.asset == *asset).map(|p| p.amount)
    }
}

/// `floor(balance * amount / supply)`, computed in 128 bits.
pub fn pro_rata(balance: u64, amount: u64, supply: u64) -> Result<u64> {
    if supply == 0 {
        return Err(RedemptionError::InsufficientBalance);
    }
    let share = (balance as u128)
        .checked_mul(amount as u128)
        .ok_or(RedemptionError::Overflow)?
        / supply as u128;
    u64::try_from(share).map_err(|_| RedemptionError::Overflow)
}

/// Per-asset payouts for redeeming `amount` out of `supply`.
///
/// Does not check eligibility; see `plan_redemption`.
pub fn quote<V: Vault>(
    registry: &Registry,
    vault: &V,
    supply: u64,
    amount: u64,
) -> Result<Vec<Payout>> {
    let mut payouts = Vec::with_capacity(registry.len());
    for asset in registry.tokens() {
        let balance = vault.balance_of(asset)?;
        payouts.push(Payout {
            asset: *asset,
            amount: pro_rata(balance, amount, supply)?,
        });
    }
    Ok(payouts)
}

/// Validate a redemption of `amount` by `holder` and compute every payout.
///
/// Reads holder balance, supply and vault balances once each; nothing is
/// cached between calls.
pub fn plan_redemption<T: RedemptionToken, V: Vault>(
    registry: &Registry,
    token: &T,
    vault: &V,
    holder: &Address,
    amount: u64,
) -> Result<RedemptionPlan> {
    if amount == 0 {
        return Err(RedemptionError::ZeroAmount);
    }
    if amount > token.balance_of(holder) {
        return Err(RedemptionError::InsufficientBalance);
    }

    // A token reporting a balance above its supply cannot be redeemed against.
    let total_supply = token.total_supply();
    if total_supply == 0 || amount > total_supply {
        return Err(RedemptionError::InsufficientBalance);
    }

    let payouts = quote(registry, vault, total_supply, amount)?;
    if payouts.iter().all(|p| p.amount == 0) {
        return Err(RedemptionError::NoEligibleAssets);
    }

    Ok(RedemptionPlan {
        amount,
        total_supply,
        payouts,
    })
}
