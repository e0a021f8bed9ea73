//! Pump.fun bonding-curve decoder.
//!
//! Anchor program, so both accounts and instructions start with an 8-byte
//! discriminator. The bonding-curve account carries the five u64 reserve
//! fields plus the `complete` flag; `buy`/`sell` instruction data is
//! `[discriminator | token_amount u64 | sol_amount u64]`.

use serde_json::json;

use dexstream_core::{
    DecodeError, DecodedEvent, EventKind, ProtocolDecoder, RawAccountUpdate, RawInstruction,
    RawTransactionUpdate,
};

use crate::helpers::read_u64_le;

pub const PUMP_FUN_PROGRAM: &str = "6EF8rrecthR5Dkzon8Nwu78hRvfCKubJ14M5uBEwF6P";

const PROTOCOL: &str = "pump-fun";

/// sha256("account:BondingCurve")[0..8]
const BONDING_CURVE_DISCRIMINATOR: [u8; 8] = [23, 183, 248, 55, 96, 216, 172, 96];

/// sha256("global:create")[0..8]
const IX_CREATE: [u8; 8] = [24, 30, 200, 40, 5, 28, 7, 119];
/// sha256("global:buy")[0..8]
const IX_BUY: [u8; 8] = [102, 6, 61, 18, 1, 218, 235, 234];
/// sha256("global:sell")[0..8]
const IX_SELL: [u8; 8] = [51, 230, 133, 164, 1, 127, 131, 173];

/// Bonding-curve account: discriminator + 5×u64 + complete flag.
const BONDING_CURVE_MIN_LEN: usize = 49;

// Bonding-curve account position in the instruction account lists.
const CREATE_CURVE_INDEX: usize = 2;
const TRADE_CURVE_INDEX: usize = 3;

pub struct PumpFunDecoder;

impl ProtocolDecoder for PumpFunDecoder {
    fn protocol(&self) -> &'static str {
        PROTOCOL
    }

    fn program_ids(&self) -> &'static [&'static str] {
        &[PUMP_FUN_PROGRAM]
    }

    fn decode_account(&self, update: &RawAccountUpdate) -> Result<DecodedEvent, DecodeError> {
        let data = &update.data;
        if data.len() < 8 || data[0..8] != BONDING_CURVE_DISCRIMINATOR {
            return Err(DecodeError::unrecognized(PROTOCOL));
        }
        if data.len() < BONDING_CURVE_MIN_LEN {
            return Err(DecodeError::malformed(
                PROTOCOL,
                format!("bonding curve truncated at {} bytes", data.len()),
            ));
        }

        let virtual_token_reserves = read_u64_le(data, 8, PROTOCOL)?;
        let virtual_sol_reserves = read_u64_le(data, 16, PROTOCOL)?;
        let real_token_reserves = read_u64_le(data, 24, PROTOCOL)?;
        let real_sol_reserves = read_u64_le(data, 32, PROTOCOL)?;
        let token_total_supply = read_u64_le(data, 40, PROTOCOL)?;
        let complete = data[48] != 0;

        let state = json!({
            "virtual_token_reserves": virtual_token_reserves,
            "virtual_sol_reserves": virtual_sol_reserves,
            "real_token_reserves": real_token_reserves,
            "real_sol_reserves": real_sol_reserves,
            "token_total_supply": token_total_supply,
            "complete": complete,
            "lamports": update.lamports,
        });

        Ok(DecodedEvent {
            protocol: PROTOCOL.to_string(),
            kind: EventKind::Other,
            entity: update.account.clone(),
            base_amount: 0,
            quote_amount: 0,
            base_reserve: virtual_token_reserves,
            quote_reserve: virtual_sol_reserves,
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
            if instruction.program != PUMP_FUN_PROGRAM {
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
    let discriminator: [u8; 8] = data
        .get(0..8)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| DecodeError::unrecognized(PROTOCOL))?;

    let (kind, base_amount, quote_amount, curve_index) = match discriminator {
        IX_CREATE => (EventKind::Initialize, 0, 0, CREATE_CURVE_INDEX),
        // buy: token_amount, max_sol_cost
        IX_BUY => (
            EventKind::Swap,
            read_u64_le(data, 8, PROTOCOL)?,
            read_u64_le(data, 16, PROTOCOL)?,
            TRADE_CURVE_INDEX,
        ),
        // sell: token_amount, min_sol_output
        IX_SELL => (
            EventKind::Swap,
            read_u64_le(data, 8, PROTOCOL)?,
            read_u64_le(data, 16, PROTOCOL)?,
            TRADE_CURVE_INDEX,
        ),
        _ => return Err(DecodeError::unrecognized(PROTOCOL)),
    };

    let entity = instruction.accounts.get(curve_index).ok_or_else(|| {
        DecodeError::malformed(
            PROTOCOL,
            format!(
                "instruction needs account {curve_index}, has {}",
                instruction.accounts.len()
            ),
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

// ─── Tests ────────────────────────────────────────────────────────────────────
