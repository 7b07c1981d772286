//! Redemptions: Solana program that lets redemption-token holders burn their
//! tokens for a pro-rata share of every registered asset in a shared vault.

#![deny(unsafe_code)]

extern crate alloc;

pub mod engine;

// 1. mod constants
pub mod constants {
    use core::mem::size_of;
    use crate::engine::Registry;
    use crate::state::{StateHeader, VaultTable};

    pub const MAGIC: u64 = 0x524544454d505453; // "REDEMPTS"
    pub const VERSION: u32 = 1;

    pub const HEADER_LEN: usize = size_of::<StateHeader>();
    pub const REGISTRY_OFF: usize = HEADER_LEN;
    pub const REGISTRY_LEN: usize = size_of::<Registry>();
    pub const VAULTS_OFF: usize = REGISTRY_OFF + REGISTRY_LEN;
    pub const VAULTS_LEN: usize = size_of::<VaultTable>();
    pub const STATE_LEN: usize = VAULTS_OFF + VAULTS_LEN;

    pub const VAULT_SEED: &[u8] = b"vault";

    /// Accounts in a `Redeem` before the per-asset (vault, destination) pairs.
    pub const REDEEM_FIXED_ACCOUNTS: usize = 6;

    pub use crate::engine::MAX_REDEEMABLE_TOKENS;
}

// 2. mod error
pub mod error {
    use num_derive::FromPrimitive;
    use num_traits::FromPrimitive;
    use solana_program::{
        decode_error::DecodeError,
        msg,
        program_error::{PrintProgramError, ProgramError},
    };
    use thiserror::Error;
    use crate::engine::RedemptionError;

    #[derive(Clone, Copy, Debug, Eq, PartialEq, Error, FromPrimitive)]
    pub enum RedemptionsError {
        #[error("State account is not initialized")]
        NotInitialized = 0,
        #[error("State account is already initialized")]
        AlreadyInitialized = 1,
        #[error("State layout version mismatch")]
        InvalidVersion = 2,
        #[error("State account has the wrong length")]
        InvalidStateLen = 3,
        #[error("Account must sign")]
        ExpectedSigner = 4,
        #[error("Account must be writable")]
        ExpectedWritable = 5,
        #[error("Vault token account does not match the registry")]
        InvalidVaultAccount = 6,
        #[error("Token account is not valid for this holder")]
        InvalidTokenAccount = 7,
        #[error("Mint does not match")]
        InvalidMint = 8,
        // Engine errors mapped:
        #[error("Address is not a token mint")]
        InvalidAsset = 9,
        #[error("Token is already redeemable")]
        DuplicateAsset = 10,
        #[error("Token is not redeemable")]
        AssetNotFound = 11,
        #[error("Redeemable token registry is full")]
        RegistryFull = 12,
        #[error("Redemption amount is zero")]
        ZeroAmount = 13,
        #[error("Redemption amount exceeds balance")]
        InsufficientBalance = 14,
        #[error("No redeemable asset would pay out")]
        NoEligibleAssets = 15,
        #[error("Caller may not manage redeemable tokens")]
        Unauthorized = 16,
        #[error("Registry limit out of range")]
        InvalidLimit = 17,
        #[error("Arithmetic overflow")]
        Overflow = 18,
    }

    impl From<RedemptionsError> for ProgramError {
        fn from(e: RedemptionsError) -> Self {
            ProgramError::Custom(e as u32)
        }
    }

    impl<T> DecodeError<T> for RedemptionsError {
        fn type_of() -> &'static str {
            "RedemptionsError"
        }
    }

    impl PrintProgramError for RedemptionsError {
        fn print<E>(&self)
        where
            E: 'static + std::error::Error + DecodeError<E> + PrintProgramError + FromPrimitive,
        {
            msg!("Error: {}", self);
        }
    }

    pub fn map_engine_error(e: RedemptionError) -> ProgramError {
        let err = match e {
            RedemptionError::InvalidAsset => RedemptionsError::InvalidAsset,
            RedemptionError::DuplicateAsset => RedemptionsError::DuplicateAsset,
            RedemptionError::AssetNotFound => RedemptionsError::AssetNotFound,
            RedemptionError::RegistryFull => RedemptionsError::RegistryFull,
            RedemptionError::ZeroAmount => RedemptionsError::ZeroAmount,
            RedemptionError::InsufficientBalance => RedemptionsError::InsufficientBalance,
            RedemptionError::NoEligibleAssets => RedemptionsError::NoEligibleAssets,
            RedemptionError::Unauthorized => RedemptionsError::Unauthorized,
            RedemptionError::InvalidLimit => RedemptionsError::InvalidLimit,
            RedemptionError::Overflow => RedemptionsError::Overflow,
        };
        ProgramError::Custom(err as u32)
    }
}

// 3. mod ix
pub mod ix {
    use alloc::vec::Vec;
    use arrayref::array_ref;
    use solana_program::{program_error::ProgramError, pubkey::Pubkey};

    #[derive(Debug, PartialEq, Eq)]
    pub enum Instruction {
        Initialize {
            authority: Pubkey,
            max_redeemable_tokens: u8,
            redeemable_tokens: Vec<Pubkey>,
        },
        AddRedeemableToken { token: Pubkey },
        RemoveRedeemableToken { token: Pubkey },
        Redeem { amount: u64 },
        UpdateAuthority { new_authority: Pubkey },
        GetRedeemableTokens,
        QuoteRedemption { amount: u64 },
    }

    impl Instruction {
        pub fn decode(input: &[u8]) -> Result<Self, ProgramError> {
            let (&tag, mut rest) = input.split_first().ok_or(ProgramError::InvalidInstructionData)?;

            match tag {
                0 => { // Initialize
                    let authority = read_pubkey(&mut rest)?;
                    let max_redeemable_tokens = read_u8(&mut rest)?;
                    let count = read_u8(&mut rest)? as usize;
                    let mut redeemable_tokens = Vec::with_capacity(count);
                    for _ in 0..count {
                        redeemable_tokens.push(read_pubkey(&mut rest)?);
                    }
                    Ok(Instruction::Initialize { authority, max_redeemable_tokens, redeemable_tokens })
                },
                1 => { // AddRedeemableToken
                    let token = read_pubkey(&mut rest)?;
                    Ok(Instruction::AddRedeemableToken { token })
                },
                2 => { // RemoveRedeemableToken
                    let token = read_pubkey(&mut rest)?;
                    Ok(Instruction::RemoveRedeemableToken { token })
                },
                3 => { // Redeem
                    let amount = read_u64(&mut rest)?;
                    Ok(Instruction::Redeem { amount })
                },
                4 => { // UpdateAuthority
                    let new_authority = read_pubkey(&mut rest)?;
                    Ok(Instruction::UpdateAuthority { new_authority })
                },
                5 => Ok(Instruction::GetRedeemableTokens),
                6 => { // QuoteRedemption
                    let amount = read_u64(&mut rest)?;
                    Ok(Instruction::QuoteRedemption { amount })
                },
                _ => Err(ProgramError::InvalidInstructionData),
            }
        }
    }

    fn read_u8(input: &mut &[u8]) -> Result<u8, ProgramError> {
        let (&val, rest) = input.split_first().ok_or(ProgramError::InvalidInstructionData)?;
        *input = rest;
        Ok(val)
    }

    fn read_u64(input: &mut &[u8]) -> Result<u64, ProgramError> {
        if input.len() < 8 { return Err(ProgramError::InvalidInstructionData); }
        let (bytes, rest) = input.split_at(8);
        *input = rest;
        Ok(u64::from_le_bytes(*array_ref![bytes, 0, 8]))
    }

    fn read_pubkey(input: &mut &[u8]) -> Result<Pubkey, ProgramError> {
        if input.len() < 32 { return Err(ProgramError::InvalidInstructionData); }
        let (bytes, rest) = input.split_at(32);
        *input = rest;
        Ok(Pubkey::new_from_array(*array_ref![bytes, 0, 32]))
    }
}

// 4. mod accounts
pub mod accounts {
    use solana_program::{account_info::AccountInfo, program_error::ProgramError, pubkey::Pubkey};
    use crate::{constants::VAULT_SEED, error::RedemptionsError};

    pub fn expect_len(accounts: &[AccountInfo], n: usize) -> Result<(), ProgramError> {
        if accounts.len() < n {
            return Err(ProgramError::NotEnoughAccountKeys);
        }
        Ok(())
    }

    pub fn expect_signer(ai: &AccountInfo) -> Result<(), ProgramError> {
        if !ai.is_signer {
            return Err(RedemptionsError::ExpectedSigner.into());
        }
        Ok(())
    }

    pub fn expect_writable(ai: &AccountInfo) -> Result<(), ProgramError> {
        if !ai.is_writable {
            return Err(RedemptionsError::ExpectedWritable.into());
        }
        Ok(())
    }

    pub fn expect_owner(ai: &AccountInfo, owner: &Pubkey) -> Result<(), ProgramError> {
        if ai.owner != owner {
            return Err(ProgramError::IllegalOwner);
        }
        Ok(())
    }

    pub fn expect_key(ai: &AccountInfo, expected: &Pubkey) -> Result<(), ProgramError> {
        if ai.key != expected {
            return Err(ProgramError::InvalidArgument);
        }
        Ok(())
    }

    pub fn expect_token_program(ai: &AccountInfo) -> Result<(), ProgramError> {
        if *ai.key != spl_token::ID {
            return Err(ProgramError::IncorrectProgramId);
        }
        Ok(())
    }

    /// PDA that owns every vault token account of a state instance.
    pub fn derive_vault_authority(program_id: &Pubkey, state_key: &Pubkey) -> (Pubkey, u8) {
        Pubkey::find_program_address(&[VAULT_SEED, state_key.as_ref()], program_id)
    }
}

// 5. mod state
pub mod state {
    use bytemuck::{Pod, Zeroable};
    use core::cell::{Ref, RefMut};
    use solana_program::account_info::AccountInfo;
    use solana_program::program_error::ProgramError;
    use crate::constants::{HEADER_LEN, REGISTRY_OFF, REGISTRY_LEN, VAULTS_OFF, VAULTS_LEN};
    use crate::engine::{Address, Registry, MAX_REDEEMABLE_TOKENS};

    /// Vault token account key per registry slot.
    pub type VaultTable = [[u8; 32]; MAX_REDEEMABLE_TOKENS];

    #[repr(C)]
    #[derive(Clone, Copy, Debug, Pod, Zeroable)]
    pub struct StateHeader {
        pub magic: u64,
        pub version: u32,
        /// Vault authority PDA bump
        pub bump: u8,
        pub _padding: [u8; 3],
        /// Key allowed to manage the registry; all zeros disables management
        pub authority: [u8; 32],
        pub redemption_mint: [u8; 32],
        pub _reserved: [u8; 16],
    }

    pub fn state_data<'a, 'b>(ai: &'b AccountInfo<'a>) -> Result<Ref<'b, &'b mut [u8]>, ProgramError> {
        ai.try_borrow_data()
    }

    pub fn state_data_mut<'a, 'b>(ai: &'b AccountInfo<'a>) -> Result<RefMut<'b, &'a mut [u8]>, ProgramError> {
        ai.try_borrow_mut_data()
    }

    pub fn read_header(data: &[u8]) -> StateHeader {
        bytemuck::pod_read_unaligned(&data[..HEADER_LEN])
    }

    pub fn write_header(data: &mut [u8], h: &StateHeader) {
        data[..HEADER_LEN].copy_from_slice(bytemuck::bytes_of(h));
    }

    pub fn read_registry(data: &[u8]) -> Registry {
        bytemuck::pod_read_unaligned(&data[REGISTRY_OFF..REGISTRY_OFF + REGISTRY_LEN])
    }

    pub fn write_registry(data: &mut [u8], r: &Registry) {
        data[REGISTRY_OFF..REGISTRY_OFF + REGISTRY_LEN].copy_from_slice(bytemuck::bytes_of(r));
    }

    pub fn read_vaults(data: &[u8]) -> VaultTable {
        bytemuck::pod_read_unaligned(&data[VAULTS_OFF..VAULTS_OFF + VAULTS_LEN])
    }

    pub fn write_vaults(data: &mut [u8], v: &VaultTable) {
        data[VAULTS_OFF..VAULTS_OFF + VAULTS_LEN].copy_from_slice(bytemuck::bytes_of(v));
    }

    /// Vault recorded for `asset`, if it is registered.
    pub fn vault_of(registry: &Registry, vaults: &VaultTable, asset: &Address) -> Option<[u8; 32]> {
        registry.tokens().iter().position(|t| t == asset).map(|i| vaults[i])
    }

    /// Lays vault keys out in the slot order of `registry`.
    pub fn align_vaults(registry: &Registry, mut vault_for: impl FnMut(&Address) -> Option<[u8; 32]>) -> VaultTable {
        let mut out = [[0u8; 32]; MAX_REDEEMABLE_TOKENS];
        for (slot, asset) in out.iter_mut().zip(registry.tokens()) {
            *slot = vault_for(asset).unwrap_or_default();
        }
        out
    }
}

// 6. mod events
pub mod events {
    use solana_program::{log::sol_log_data, msg, pubkey::Pubkey};
    use crate::engine::RedemptionPlan;

    pub const INITIALIZED: &[u8] = b"initialized";
    pub const TOKEN_ADDED: &[u8] = b"redeemable_token_added";
    pub const TOKEN_REMOVED: &[u8] = b"redeemable_token_removed";
    pub const REDEEMED: &[u8] = b"redeemed";
    pub const PAYOUT: &[u8] = b"payout";
    pub const AUTHORITY_UPDATED: &[u8] = b"authority_updated";

    pub fn initialized(redemption_mint: &Pubkey, authority: &Pubkey, count: usize) {
        msg!("Initialized redemption_mint={} authority={} redeemable={}", redemption_mint, authority, count);
        sol_log_data(&[INITIALIZED, redemption_mint.as_ref(), authority.as_ref()]);
    }

    pub fn redeemable_token_added(token: &Pubkey) {
        msg!("RedeemableTokenAdded token={}", token);
        sol_log_data(&[TOKEN_ADDED, token.as_ref()]);
    }

    pub fn redeemable_token_removed(token: &Pubkey) {
        msg!("RedeemableTokenRemoved token={}", token);
        sol_log_data(&[TOKEN_REMOVED, token.as_ref()]);
    }

    /// One `redeemed` record followed by a `payout` record per transfer.
    pub fn redeemed(holder: &Pubkey, plan: &RedemptionPlan) {
        msg!("Redeemed holder={} amount={}", holder, plan.amount);
        sol_log_data(&[REDEEMED, holder.as_ref(), &plan.amount.to_le_bytes()]);
        for payout in plan.transfers() {
            sol_log_data(&[PAYOUT, &payout.asset, &payout.amount.to_le_bytes()]);
        }
    }

    pub fn authority_updated(old: &Pubkey, new: &Pubkey) {
        msg!("AuthorityUpdated old={} new={}", old, new);
        sol_log_data(&[AUTHORITY_UPDATED, old.as_ref(), new.as_ref()]);
    }
}

// 7. mod token
pub mod token {
    use solana_program::{
        account_info::AccountInfo, program_error::ProgramError, program_pack::Pack,
    };
    use spl_token::state::{Account as TokenAccount, Mint};

    #[cfg(not(test))]
    use solana_program::program::{invoke, invoke_signed};

    pub fn read_token_account(ai: &AccountInfo) -> Result<TokenAccount, ProgramError> {
        if ai.owner != &spl_token::ID || ai.data_len() != TokenAccount::LEN {
            return Err(ProgramError::InvalidAccountData);
        }
        let data = ai.try_borrow_data()?;
        TokenAccount::unpack(&data)
    }

    pub fn read_mint(ai: &AccountInfo) -> Result<Mint, ProgramError> {
        if ai.owner != &spl_token::ID || ai.data_len() != Mint::LEN {
            return Err(ProgramError::InvalidAccountData);
        }
        let data = ai.try_borrow_data()?;
        Mint::unpack(&data)
    }

    pub fn is_mint(ai: &AccountInfo) -> bool {
        read_mint(ai).is_ok()
    }

    /// Move `amount` out of a vault token account, signed by the vault PDA.
    pub fn transfer_from_vault<'a>(
        _token_program: &AccountInfo<'a>,
        source: &AccountInfo<'a>,
        dest: &AccountInfo<'a>,
        _authority: &AccountInfo<'a>,
        amount: u64,
        _signer_seeds: &[&[&[u8]]],
    ) -> Result<(), ProgramError> {
        #[cfg(not(test))]
        {
            let ix = spl_token::instruction::transfer(
                _token_program.key,
                source.key,
                dest.key,
                _authority.key,
                &[],
                amount,
            )?;
            invoke_signed(&ix, &[source.clone(), dest.clone(), _authority.clone(), _token_program.clone()], _signer_seeds)
        }
        #[cfg(test)]
        {
            let mut src_data = source.try_borrow_mut_data()?;
            let mut src_state = TokenAccount::unpack(&src_data)?;
            src_state.amount = src_state.amount.checked_sub(amount).ok_or(ProgramError::InsufficientFunds)?;
            TokenAccount::pack(src_state, &mut src_data)?;

            let mut dst_data = dest.try_borrow_mut_data()?;
            let mut dst_state = TokenAccount::unpack(&dst_data)?;
            dst_state.amount = dst_state.amount.checked_add(amount).ok_or(ProgramError::InvalidAccountData)?;
            TokenAccount::pack(dst_state, &mut dst_data)?;
            Ok(())
        }
    }

    /// Burn `amount` from the holder's account, signed by the holder.
    pub fn burn<'a>(
        _token_program: &AccountInfo<'a>,
        account: &AccountInfo<'a>,
        mint: &AccountInfo<'a>,
        _owner: &AccountInfo<'a>,
        amount: u64,
    ) -> Result<(), ProgramError> {
        #[cfg(not(test))]
        {
            let ix = spl_token::instruction::burn(
                _token_program.key,
                account.key,
                mint.key,
                _owner.key,
                &[],
                amount,
            )?;
            invoke(&ix, &[account.clone(), mint.clone(), _owner.clone(), _token_program.clone()])
        }
        #[cfg(test)]
        {
            let mut acc_data = account.try_borrow_mut_data()?;
            let mut acc_state = TokenAccount::unpack(&acc_data)?;
            acc_state.amount = acc_state.amount.checked_sub(amount).ok_or(ProgramError::InsufficientFunds)?;
            TokenAccount::pack(acc_state, &mut acc_data)?;

            let mut mint_data = mint.try_borrow_mut_data()?;
            let mut mint_state = Mint::unpack(&mint_data)?;
            mint_state.supply = mint_state.supply.checked_sub(amount).ok_or(ProgramError::InsufficientFunds)?;
            Mint::pack(mint_state, &mut mint_data)?;
            Ok(())
        }
    }
}

// 8. mod processor
pub mod processor {
    use alloc::vec::Vec;
    use solana_program::{
        account_info::AccountInfo, entrypoint::ProgramResult, pubkey::Pubkey,
        program::set_return_data,
        program_error::ProgramError,
    };
    use crate::{
        ix::Instruction,
        state::{self, StateHeader, VaultTable},
        accounts,
        constants::{MAGIC, VERSION, STATE_LEN, VAULT_SEED, REDEEM_FIXED_ACCOUNTS},
        error::{RedemptionsError, map_engine_error},
        engine::{self, Address, AssetCheck, Authority, Payout, RedemptionError, RedemptionToken, Registry, Vault, ZERO_ADDRESS},
        events,
        token,
    };

    /// Treats an address as an asset when a matching SPL mint account was passed.
    struct MintAccounts<'a, 'b>(&'b [AccountInfo<'a>]);

    impl AssetCheck for MintAccounts<'_, '_> {
        fn is_asset(&self, address: &Address) -> bool {
            self.0
                .iter()
                .find(|ai| ai.key.to_bytes() == *address)
                .map_or(false, token::is_mint)
        }
    }

    struct StoredAuthority([u8; 32]);

    impl Authority for StoredAuthority {
        fn is_authorized(&self, caller: &Address) -> bool {
            self.0 != ZERO_ADDRESS && *caller == self.0
        }
    }

    /// Vault balances read from the token accounts passed to this instruction.
    struct VaultBalances(Vec<(Address, u64)>);

    impl Vault for VaultBalances {
        fn balance_of(&self, asset: &Address) -> engine::Result<u64> {
            self.0
                .iter()
                .find(|(a, _)| a == asset)
                .map(|(_, b)| *b)
                .ok_or(RedemptionError::AssetNotFound)
        }
    }

    struct Holding {
        holder: Address,
        balance: u64,
        supply: u64,
    }

    impl RedemptionToken for Holding {
        fn balance_of(&self, holder: &Address) -> u64 {
            if *holder == self.holder { self.balance } else { 0 }
        }

        fn total_supply(&self) -> u64 {
            self.supply
        }
    }

    fn state_guard(program_id: &Pubkey, state: &AccountInfo, data: &[u8]) -> Result<(), ProgramError> {
        accounts::expect_owner(state, program_id)?;
        if data.len() != STATE_LEN { return Err(RedemptionsError::InvalidStateLen.into()); }
        Ok(())
    }

    fn require_initialized(data: &[u8]) -> Result<StateHeader, ProgramError> {
        let h = state::read_header(data);
        if h.magic != MAGIC { return Err(RedemptionsError::NotInitialized.into()); }
        if h.version != VERSION { return Err(RedemptionsError::InvalidVersion.into()); }
        Ok(h)
    }

    /// Checks a vault token account for `asset` and returns its balance.
    fn verify_vault(
        a_vault: &AccountInfo,
        vault_authority: &Pubkey,
        asset: &Address,
        expected_key: &Pubkey,
    ) -> Result<u64, ProgramError> {
        if a_vault.key != expected_key { return Err(RedemptionsError::InvalidVaultAccount.into()); }
        let tok = token::read_token_account(a_vault).map_err(|_| RedemptionsError::InvalidVaultAccount)?;
        if tok.mint.to_bytes() != *asset { return Err(RedemptionsError::InvalidVaultAccount.into()); }
        if tok.owner != *vault_authority { return Err(RedemptionsError::InvalidVaultAccount.into()); }
        Ok(tok.amount)
    }

    /// Checks the holder's destination account for `asset` and returns its balance.
    fn verify_destination(
        a_dest: &AccountInfo,
        a_vault: &AccountInfo,
        holder: &Pubkey,
        asset: &Address,
    ) -> Result<u64, ProgramError> {
        if a_dest.key == a_vault.key { return Err(RedemptionsError::InvalidTokenAccount.into()); }
        let tok = token::read_token_account(a_dest).map_err(|_| RedemptionsError::InvalidTokenAccount)?;
        if tok.mint.to_bytes() != *asset { return Err(RedemptionsError::InvalidMint.into()); }
        if tok.owner != *holder { return Err(RedemptionsError::InvalidTokenAccount.into()); }
        Ok(tok.amount)
    }

    /// Balances of the recorded vaults, one account per registry slot.
    fn read_vault_balances(
        registry: &Registry,
        recorded: &VaultTable,
        vaults: &[AccountInfo],
        vault_authority: &Pubkey,
    ) -> Result<VaultBalances, ProgramError> {
        let mut balances = Vec::with_capacity(registry.len());
        for ((asset, key), a_vault) in registry.tokens().iter().zip(recorded).zip(vaults) {
            let expected = Pubkey::new_from_array(*key);
            balances.push((*asset, verify_vault(a_vault, vault_authority, asset, &expected)?));
        }
        Ok(VaultBalances(balances))
    }

    pub fn process_instruction<'a, 'b>(
        program_id: &Pubkey,
        accounts: &'b [AccountInfo<'a>],
        instruction_data: &[u8],
    ) -> ProgramResult {
        let instruction = Instruction::decode(instruction_data)?;

        match instruction {
            Instruction::Initialize { authority, max_redeemable_tokens, redeemable_tokens } => {
                accounts::expect_len(accounts, 3)?;
                let a_payer = &accounts[0];
                let a_state = &accounts[1];
                let a_mint = &accounts[2];

                accounts::expect_signer(a_payer)?;
                accounts::expect_writable(a_state)?;

                let mut data = state::state_data_mut(a_state)?;
                state_guard(program_id, a_state, &data)?;

                let header = state::read_header(&data);
                if header.magic == MAGIC { return Err(RedemptionsError::AlreadyInitialized.into()); }

                let initial: Vec<Address> = redeemable_tokens.iter().map(|k| k.to_bytes()).collect();
                let registry = engine::initialize(
                    &MintAccounts(&accounts[2..]),
                    &a_mint.key.to_bytes(),
                    &initial,
                    max_redeemable_tokens as u64,
                ).map_err(map_engine_error)?;

                let (auth, bump) = accounts::derive_vault_authority(program_id, a_state.key);

                // Accounts 3.. are (mint, vault) pairs in list order.
                accounts::expect_len(accounts, 3 + 2 * registry.len())?;
                let mut bound = Vec::with_capacity(registry.len());
                for (i, asset) in registry.tokens().iter().enumerate() {
                    accounts::expect_key(&accounts[3 + 2 * i], &Pubkey::new_from_array(*asset))?;
                    let a_vault = &accounts[4 + 2 * i];
                    verify_vault(a_vault, &auth, asset, a_vault.key)?;
                    bound.push((*asset, a_vault.key.to_bytes()));
                }
                let vaults = state::align_vaults(&registry, |a| {
                    bound.iter().find(|(asset, _)| asset == a).map(|(_, v)| *v)
                });

                data.fill(0);
                let new_header = StateHeader {
                    magic: MAGIC,
                    version: VERSION,
                    bump,
                    _padding: [0; 3],
                    authority: authority.to_bytes(),
                    redemption_mint: a_mint.key.to_bytes(),
                    _reserved: [0; 16],
                };
                state::write_header(&mut data, &new_header);
                state::write_registry(&mut data, &registry);
                state::write_vaults(&mut data, &vaults);

                events::initialized(a_mint.key, &authority, registry.len());
            },
            Instruction::AddRedeemableToken { token } => {
                accounts::expect_len(accounts, 4)?;
                let a_authority = &accounts[0];
                let a_state = &accounts[1];
                let a_vault = &accounts[3];

                accounts::expect_signer(a_authority)?;
                accounts::expect_writable(a_state)?;

                let mut data = state::state_data_mut(a_state)?;
                state_guard(program_id, a_state, &data)?;
                let header = require_initialized(&data)?;

                let before = state::read_registry(&data);
                let recorded = state::read_vaults(&data);
                let mut registry = before;
                registry.add(
                    &StoredAuthority(header.authority),
                    &a_authority.key.to_bytes(),
                    &MintAccounts(&accounts[2..3]),
                    &token.to_bytes(),
                ).map_err(map_engine_error)?;

                let (auth, _) = accounts::derive_vault_authority(program_id, a_state.key);
                verify_vault(a_vault, &auth, &token.to_bytes(), a_vault.key)?;
                let vaults = state::align_vaults(&registry, |a| {
                    if *a == token.to_bytes() {
                        Some(a_vault.key.to_bytes())
                    } else {
                        state::vault_of(&before, &recorded, a)
                    }
                });
                state::write_registry(&mut data, &registry);
                state::write_vaults(&mut data, &vaults);

                events::redeemable_token_added(&token);
            },
            Instruction::RemoveRedeemableToken { token } => {
                accounts::expect_len(accounts, 2)?;
                let a_authority = &accounts[0];
                let a_state = &accounts[1];

                accounts::expect_signer(a_authority)?;
                accounts::expect_writable(a_state)?;

                let mut data = state::state_data_mut(a_state)?;
                state_guard(program_id, a_state, &data)?;
                let header = require_initialized(&data)?;

                let before = state::read_registry(&data);
                let recorded = state::read_vaults(&data);
                let mut registry = before;
                registry.remove(
                    &StoredAuthority(header.authority),
                    &a_authority.key.to_bytes(),
                    &token.to_bytes(),
                ).map_err(map_engine_error)?;
                let vaults = state::align_vaults(&registry, |a| state::vault_of(&before, &recorded, a));
                state::write_registry(&mut data, &registry);
                state::write_vaults(&mut data, &vaults);

                events::redeemable_token_removed(&token);
            },
            Instruction::Redeem { amount } => {
                accounts::expect_len(accounts, REDEEM_FIXED_ACCOUNTS)?;
                let a_holder = &accounts[0];
                let a_state = &accounts[1];
                let a_mint = &accounts[2];
                let a_holder_ata = &accounts[3];
                let a_vault_auth = &accounts[4];
                let a_token = &accounts[5];

                accounts::expect_signer(a_holder)?;
                accounts::expect_writable(a_mint)?;
                accounts::expect_writable(a_holder_ata)?;
                accounts::expect_token_program(a_token)?;

                let (header, registry, recorded) = {
                    let data = state::state_data(a_state)?;
                    state_guard(program_id, a_state, &data)?;
                    let header = require_initialized(&data)?;
                    (header, state::read_registry(&data), state::read_vaults(&data))
                };
                if a_mint.key.to_bytes() != header.redemption_mint {
                    return Err(RedemptionsError::InvalidMint.into());
                }

                let (auth, _) = accounts::derive_vault_authority(program_id, a_state.key);
                accounts::expect_key(a_vault_auth, &auth)?;

                let n = registry.len();
                accounts::expect_len(accounts, REDEEM_FIXED_ACCOUNTS + 2 * n)?;
                let pairs = &accounts[REDEEM_FIXED_ACCOUNTS..REDEEM_FIXED_ACCOUNTS + 2 * n];

                let holder_tok = token::read_token_account(a_holder_ata)
                    .map_err(|_| RedemptionsError::InvalidTokenAccount)?;
                if holder_tok.mint != *a_mint.key { return Err(RedemptionsError::InvalidMint.into()); }
                if holder_tok.owner != *a_holder.key { return Err(RedemptionsError::InvalidTokenAccount.into()); }
                let mint = token::read_mint(a_mint).map_err(|_| RedemptionsError::InvalidMint)?;

                let vaults: Vec<AccountInfo<'a>> = pairs.iter().step_by(2).cloned().collect();
                let balances = read_vault_balances(&registry, &recorded, &vaults, &auth)?;
                let holding = Holding {
                    holder: a_holder.key.to_bytes(),
                    balance: holder_tok.amount,
                    supply: mint.supply,
                };

                let plan = engine::plan_redemption(&registry, &holding, &balances, &holding.holder, amount)
                    .map_err(map_engine_error)?;

                // Preflight every transfer before any token moves.
                for (i, payout) in plan.payouts.iter().enumerate() {
                    let a_vault = &pairs[2 * i];
                    let a_dest = &pairs[2 * i + 1];
                    let dest_balance = verify_destination(a_dest, a_vault, a_holder.key, &payout.asset)?;
                    accounts::expect_writable(a_vault)?;
                    accounts::expect_writable(a_dest)?;
                    dest_balance.checked_add(payout.amount).ok_or(RedemptionsError::Overflow)?;
                }

                let bump_arr: [u8; 1] = [header.bump];
                let seeds: [&[u8]; 3] = [VAULT_SEED, a_state.key.as_ref(), &bump_arr];
                let signer_seeds: [&[&[u8]]; 1] = [&seeds];

                for (i, payout) in plan.payouts.iter().enumerate() {
                    if payout.amount == 0 { continue; }
                    token::transfer_from_vault(a_token, &pairs[2 * i], &pairs[2 * i + 1], a_vault_auth, payout.amount, &signer_seeds)?;
                }
                token::burn(a_token, a_holder_ata, a_mint, a_holder, plan.amount)?;

                events::redeemed(a_holder.key, &plan);
            },
            Instruction::UpdateAuthority { new_authority } => {
                accounts::expect_len(accounts, 2)?;
                let a_authority = &accounts[0];
                let a_state = &accounts[1];

                accounts::expect_signer(a_authority)?;
                accounts::expect_writable(a_state)?;

                let mut data = state::state_data_mut(a_state)?;
                state_guard(program_id, a_state, &data)?;
                let mut header = require_initialized(&data)?;

                if !StoredAuthority(header.authority).is_authorized(&a_authority.key.to_bytes()) {
                    return Err(RedemptionsError::Unauthorized.into());
                }
                header.authority = new_authority.to_bytes();
                state::write_header(&mut data, &header);

                events::authority_updated(a_authority.key, &new_authority);
            },
            Instruction::GetRedeemableTokens => {
                accounts::expect_len(accounts, 1)?;
                let a_state = &accounts[0];

                let data = state::state_data(a_state)?;
                state_guard(program_id, a_state, &data)?;
                let header = require_initialized(&data)?;
                let registry = state::read_registry(&data);

                let mut out = Vec::with_capacity(33 + 32 * registry.len());
                out.extend_from_slice(&header.redemption_mint);
                out.push(registry.len() as u8);
                for t in registry.tokens() {
                    out.extend_from_slice(t);
                }
                set_return_data(&out);
            },
            Instruction::QuoteRedemption { amount } => {
                accounts::expect_len(accounts, 2)?;
                let a_state = &accounts[0];
                let a_mint = &accounts[1];

                let (header, registry, recorded) = {
                    let data = state::state_data(a_state)?;
                    state_guard(program_id, a_state, &data)?;
                    let header = require_initialized(&data)?;
                    (header, state::read_registry(&data), state::read_vaults(&data))
                };
                if a_mint.key.to_bytes() != header.redemption_mint {
                    return Err(RedemptionsError::InvalidMint.into());
                }
                let supply = token::read_mint(a_mint).map_err(|_| RedemptionsError::InvalidMint)?.supply;
                if amount == 0 { return Err(RedemptionsError::ZeroAmount.into()); }
                if amount > supply { return Err(RedemptionsError::InsufficientBalance.into()); }

                accounts::expect_len(accounts, 2 + registry.len())?;
                let (auth, _) = accounts::derive_vault_authority(program_id, a_state.key);
                let balances = read_vault_balances(&registry, &recorded, &accounts[2..], &auth)?;

                let payouts: Vec<Payout> = engine::quote(&registry, &balances, supply, amount)
                    .map_err(map_engine_error)?;

                let mut out = Vec::with_capacity(1 + 40 * payouts.len());
                out.push(payouts.len() as u8);
                for p in &payouts {
                    out.extend_from_slice(&p.asset);
                    out.extend_from_slice(&p.amount.to_le_bytes());
                }
                set_return_data(&out);
            },
        }
        Ok(())
    }
}

// 9. mod entrypoint
#[cfg(not(feature = "no-entrypoint"))]
#[allow(unsafe_code)]
pub mod entrypoint {
    use solana_program::{
        account_info::AccountInfo, entrypoint, entrypoint::ProgramResult,
        program_error::PrintProgramError, pubkey::Pubkey,
    };
    use crate::{error::RedemptionsError, processor};

    entrypoint!(process_instruction);

    fn process_instruction<'a>(
        program_id: &Pubkey,
        accounts: &'a [AccountInfo<'a>],
        instruction_data: &[u8],
    ) -> ProgramResult {
        if let Err(error) = processor::process_instruction(program_id, accounts, instruction_data) {
            error.print::<RedemptionsError>();
            return Err(error);
        }
        Ok(())
    }
}
