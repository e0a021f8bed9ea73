//! Raydium AMM v4 decoder.
//!
//! Accounts: the 752-byte liquidity-state v4 layout. The fields the
//! pipeline cares about sit at fixed offsets — status and decimals up
//! front, the swap totalizers after the fee block, the pubkey block at
//! 336, and `lp_reserve` at 720.
//!
//! Instructions: single tag byte, then fixed-width little-endian amounts.
//! Tag 1 = initialize2, 3 = deposit, 4 = withdraw, 9 = swap (base in),
//! 11 = swap (base out). Anything else is `Unrecognized`.

use serde_json::json;

use dexstream_core::{
    DecodeError, DecodedEvent, EventKind, ProtocolDecoder, RawAccountUpdate, RawInstruction,
    RawTransactionUpdate,
};

use crate::helpers::{read_pubkey, read_u128_le, read_u64_le};

pub const RAYDIUM_AMM_V4_PROGRAM: &str = "675kPX9MHTjS2zt1qfr1NYHuzeLXfQM9H24wFSUt1Mp8";

/// Size of the liquidity-state v4 account.
pub const LIQUIDITY_STATE_V4_LEN: usize = 752;

const PROTOCOL: &str = "raydium-amm-v4";

// Account layout offsets.
const OFF_STATUS: usize = 0;
const OFF_BASE_DECIMAL: usize = 32;
const OFF_QUOTE_DECIMAL: usize = 40;
const OFF_POOL_OPEN_TIME: usize = 224;
const OFF_SWAP_BASE_IN: usize = 256;
const OFF_SWAP_QUOTE_OUT: usize = 272;
const OFF_SWAP_QUOTE_IN: usize = 296;
const OFF_SWAP_BASE_OUT: usize = 312;
const OFF_BASE_VAULT: usize = 336;
const OFF_QUOTE_VAULT: usize = 368;
const OFF_BASE_MINT: usize = 400;
const OFF_QUOTE_MINT: usize = 432;
const OFF_LP_MINT: usize = 464;
const OFF_MARKET: usize = 528;
const OFF_LP_RESERVE: usize = 720;

// Instruction tags.
const IX_INITIALIZE2: u8 = 1;
const IX_DEPOSIT: u8 = 3;
const IX_WITHDRAW: u8 = 4;
const IX_SWAP_BASE_IN: u8 = 9;
const IX_SWAP_BASE_OUT: u8 = 11;

// Position of the AMM account in each instruction's account list.
const SWAP_AMM_INDEX: usize = 1;
const INITIALIZE_AMM_INDEX: usize = 4;

pub struct RaydiumAmmDecoder;

impl ProtocolDecoder for RaydiumAmmDecoder {
    fn protocol(&self) -> &'static str {
        PROTOCOL
    }

    fn program_ids(&self) -> &'static [&'static str] {
        &[RAYDIUM_AMM_V4_PROGRAM]
    }

    fn decode_account(&self, update: &RawAccountUpdate) -> Result<DecodedEvent, DecodeError> {
        let data = &update.data;
        if data.len() != LIQUIDITY_STATE_V4_LEN {
            // Raydium's program owns other account types (target orders,
            // open orders); the size is the version discriminator here.
            return Err(DecodeError::unrecognized(PROTOCOL));
        }

        let status = read_u64_le(data, OFF_STATUS, PROTOCOL)?;
        let base_decimal = read_u64_le(data, OFF_BASE_DECIMAL, PROTOCOL)?;
        let quote_decimal = read_u64_le(data, OFF_QUOTE_DECIMAL, PROTOCOL)?;
        let pool_open_time = read_u64_le(data, OFF_POOL_OPEN_TIME, PROTOCOL)?;
        let swap_base_in = checked_u64(read_u128_le(data, OFF_SWAP_BASE_IN, PROTOCOL)?)?;
        let swap_quote_out = checked_u64(read_u128_le(data, OFF_SWAP_QUOTE_OUT, PROTOCOL)?)?;
        let swap_quote_in = checked_u64(read_u128_le(data, OFF_SWAP_QUOTE_IN, PROTOCOL)?)?;
        let swap_base_out = checked_u64(read_u128_le(data, OFF_SWAP_BASE_OUT, PROTOCOL)?)?;
        let lp_reserve = read_u64_le(data, OFF_LP_RESERVE, PROTOCOL)?;

        let state = json!({
            "status": status,
            "base_decimal": base_decimal,
            "quote_decimal": quote_decimal,
            "pool_open_time": pool_open_time,
            "base_mint": read_pubkey(data, OFF_BASE_MINT, PROTOCOL)?,
            "quote_mint": read_pubkey(data, OFF_QUOTE_MINT, PROTOCOL)?,
            "lp_mint": read_pubkey(data, OFF_LP_MINT, PROTOCOL)?,
            "base_vault": read_pubkey(data, OFF_BASE_VAULT, PROTOCOL)?,
            "quote_vault": read_pubkey(data, OFF_QUOTE_VAULT, PROTOCOL)?,
            "market": read_pubkey(data, OFF_MARKET, PROTOCOL)?,
            "swap_base_in": swap_base_in,
            "swap_quote_out": swap_quote_out,
            "swap_quote_in": swap_quote_in,
            "swap_base_out": swap_base_out,
            "lp_reserve": lp_reserve,
            "lamports": update.lamports,
        });

        Ok(DecodedEvent {
            protocol: PROTOCOL.to_string(),
            kind: EventKind::Other,
            entity: update.account.clone(),
            base_amount: 0,
            quote_amount: 0,
            // Pool reserves live in the vault accounts, not in this state
            // account; the cumulative totalizers go into the snapshot.
            base_reserve: 0,
            quote_reserve: 0,
            slot: update.slot,
            write_version: update.write_version,
            signature: None,
            state: Some(state),
        })
    }

    fn decode_transaction(
        &self,
        update: &RawTransactionUpdate,
    ) -> Result<Vec<DecodedEvent>, DecodeError> {
        if !update.success {
            return Err(DecodeError::unrecognized(PROTOCOL));
        }

        let mut events = Vec::new();
        let mut malformed = None;
        for (index, instruction) in update.instructions.iter().enumerate() {
            if instruction.program != RAYDIUM_AMM_V4_PROGRAM {
                continue;
            }
            match decode_instruction(instruction, update, index as u64) {
                Ok(event) => events.push(event),
                Err(err) if err.is_unrecognized() => {}
                Err(err) => malformed = Some(err),
            }
        }

        if events.is_empty() {
            return Err(malformed.unwrap_or_else(|| DecodeError::unrecognized(PROTOCOL)));
        }
        Ok(events)
    }
}

fn decode_instruction(
    instruction: &RawInstruction,
    update: &RawTransactionUpdate,
    index: u64,
) -> Result<DecodedEvent, DecodeError> {
    let data = &instruction.data;
    let tag = *data
        .first()
        .ok_or_else(|| DecodeError::malformed(PROTOCOL, "empty instruction data"))?;

    let (kind, base_amount, quote_amount, amm_index) = match tag {
        // initialize2: u8 nonce, u64 open_time, u64 init_pc, u64 init_coin
        IX_INITIALIZE2 => (
            EventKind::Initialize,
            read_u64_le(data, 18, PROTOCOL)?,
            read_u64_le(data, 10, PROTOCOL)?,
            INITIALIZE_AMM_INDEX,
        ),
        // deposit: u64 max_coin, u64 max_pc, u64 base_side
        IX_DEPOSIT => (
            EventKind::AddLiquidity,
            read_u64_le(data, 1, PROTOCOL)?,
            read_u64_le(data, 9, PROTOCOL)?,
            SWAP_AMM_INDEX,
        ),
        // withdraw: u64 lp_amount
        IX_WITHDRAW => (
            EventKind::RemoveLiquidity,
            read_u64_le(data, 1, PROTOCOL)?,
            0,
            SWAP_AMM_INDEX,
        ),
        // swap base in: u64 amount_in, u64 minimum_out
        IX_SWAP_BASE_IN => (
            EventKind::Swap,
            read_u64_le(data, 1, PROTOCOL)?,
            read_u64_le(data, 9, PROTOCOL)?,
            SWAP_AMM_INDEX,
        ),
        // swap base out: u64 max_in, u64 amount_out
        IX_SWAP_BASE_OUT => (
            EventKind::Swap,
            read_u64_le(data, 1, PROTOCOL)?,
            read_u64_le(data, 9, PROTOCOL)?,
            SWAP_AMM_INDEX,
        ),
        _ => return Err(DecodeError::unrecognized(PROTOCOL)),
    };

    let entity = instruction.accounts.get(amm_index).ok_or_else(|| {
        DecodeError::malformed(
            PROTOCOL,
            format!("instruction needs account {amm_index}, has {}", instruction.accounts.len()),
        )
    })?;

    Ok(DecodedEvent {
        protocol: PROTOCOL.to_string(),
        kind,
        entity: entity.clone(),
        base_amount,
        quote_amount,
        base_reserve: 0,
        quote_reserve: 0,
        slot: update.slot,
        write_version: index,
        signature: Some(update.signature.clone()),
        state: None,
    })
}

fn checked_u64(value: u128) -> Result<u64, DecodeError> {
    u64::try_from(value).map_err(|_| DecodeError::malformed(PROTOCOL, "totalizer overflows u64"))
}

// ─── Tests ────────────────────────────────────────────────────────────────────
