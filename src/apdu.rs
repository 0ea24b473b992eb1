//! APDU framing: command construction, chaining, response reassembly, and
//! status-word decoding (spec §4.2).

use crate::bytes::Writer;
use crate::error::{PivError, PivErrorKind, Result};
use crate::transport::{split_reply, CardTransport};
use tracing::{debug, warn};

/// GET RESPONSE instruction byte.
pub const INS_GET_RESPONSE: u8 = 0xC0;
/// Command-chaining class bit (ISO 7816-4 §5.1.1).
pub const CLA_CHAIN: u8 = 0x10;
/// Maximum command-data length per chain fragment in short-APDU mode.
pub const MAX_SHORT_CHUNK: usize = 255;

/// A single command/response exchange. The command-data slice is borrowed
/// and must outlive the `Apdu`; the reply is owned once populated.
pub struct Apdu<'a> {
    pub cla: u8,
    pub ins: u8,
    pub p1: u8,
    pub p2: u8,
    pub data: &'a [u8],
    /// Expected response length hint. `Some(0)` requests Le=0 (up to 256
    /// bytes, or 65536 in extended mode); `None` omits Le entirely.
    pub le: Option<u32>,
    pub reply: Vec<u8>,
    pub sw: u16,
}

impl<'a> Apdu<'a> {
    /// Build a new command APDU with no response data yet.
    pub fn new(cla: u8, ins: u8, p1: u8, p2: u8, data: &'a [u8], le: Option<u32>) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data,
            le,
            reply: Vec::new(),
            sw: 0,
        }
    }

    /// `true` if the final status word was `0x9000`.
    pub fn is_success(&self) -> bool {
        self.sw == 0x9000
    }
}

/// Encode one APDU frame (no chaining) with the given data length, using
/// extended-length Lc/Le encoding when `extended` is true and the data
/// exceeds 255 bytes or Le exceeds 256.
fn encode_frame(cla: u8, ins: u8, p1: u8, p2: u8, data: &[u8], le: Option<u32>, extended: bool) -> Result<Vec<u8>> {
    if !extended && data.len() > MAX_SHORT_CHUNK {
        return Err(PivError::argument(
            "command data exceeds 255 bytes in short-APDU mode; caller must chain",
        ));
    }

    let mut w = Writer::new();
    w.u8(cla).u8(ins).u8(p1).u8(p2);

    if extended {
        if !data.is_empty() {
            w.u8(0x00).u16(data.len() as u16);
            w.put(data);
            // Case 4E: Lc already carried the extended-mode marker, so Le is
            // a plain two-byte field with no leading 0x00.
            if let Some(le) = le {
                let le = if le == 0 || le > 0xFFFF { 0x0000 } else { le as u16 };
                w.u16(le);
            }
        } else if let Some(le) = le {
            // Case 2E: no Lc at all, so Le itself must carry the 0x00
            // extended-mode marker before its two-byte value.
            let le = if le == 0 || le > 0xFFFF { 0x0000 } else { le as u16 };
            w.u8(0x00).u16(le);
        }
    } else {
        if !data.is_empty() {
            w.u8(data.len() as u8);
            w.put(data);
        }
        if let Some(le) = le {
            w.u8(le as u8);
        }
    }

    Ok(w.into_bytes())
}

/// Split `data` into chunks for command chaining: every chunk but the last
/// carries the chain bit (`CLA_CHAIN`) and at most [`MAX_SHORT_CHUNK`]
/// bytes; the last chunk clears the chain bit and carries the original Le.
fn chain_fragments<'a>(cla: u8, data: &'a [u8]) -> Vec<(u8, &'a [u8])> {
    if data.is_empty() {
        return vec![(cla, data)];
    }
    let mut out = Vec::new();
    let mut rest = data;
    while rest.len() > MAX_SHORT_CHUNK {
        let (chunk, tail) = rest.split_at(MAX_SHORT_CHUNK);
        out.push((cla | CLA_CHAIN, chunk));
        rest = tail;
    }
    out.push((cla, rest));
    out
}

/// Map a terminal status word to an error per spec §4.2/§7. `Ok(())` only
/// for `0x9000`; callers needing the reply bytes check [`Apdu::is_success`]
/// directly rather than calling this on success.
pub fn classify_status(sw: u16) -> Result<()> {
    match sw {
        0x9000 => Ok(()),
        0x6982 | 0x6983 => Err(PivError::permission(format!("security status not satisfied ({sw:04X})")).with_status_word(sw)),
        0x6A82 => Err(PivError::not_found("object not found").with_status_word(sw)),
        0x6A81 => Err(PivError::not_supported("function not supported").with_status_word(sw)),
        0x6A84 => Err(PivError::new(PivErrorKind::DeviceOutOfMemory, "card storage exhausted").with_status_word(sw)),
        sw if sw & 0xFFF0 == 0x63C0 => {
            let retries = (sw & 0x0F) as u8;
            Err(PivError::permission(format!("PIN verification failed, {retries} retries left"))
                .with_retries(retries)
                .with_status_word(sw))
        }
        other => Err(PivError::apdu(other)),
    }
}

/// Perform one full logical exchange over `transport`: frame the command
/// (chaining as needed), send every fragment, reassemble a chained reply
/// via GET RESPONSE, and retry once on a `0x6Cxx` Le-correction. `extended`
/// selects extended-length framing when the card advertises support and
/// the caller has not forced short-APDU mode.
pub fn exchange(
    transport: &mut dyn CardTransport,
    cla: u8,
    ins: u8,
    p1: u8,
    p2: u8,
    data: &[u8],
    le: Option<u32>,
    extended: bool,
) -> Result<(Vec<u8>, u16)> {
    let fragments = if extended { vec![(cla, data)] } else { chain_fragments(cla, data) };
    let last_index = fragments.len() - 1;

    let mut final_reply = Vec::new();
    let mut final_sw = 0u16;

    for (i, (frag_cla, frag_data)) in fragments.iter().enumerate() {
        let is_last = i == last_index;
        let frag_le = if is_last { le } else { None };
        let frame = encode_frame(*frag_cla, ins, p1, p2, frag_data, frag_le, extended)?;
        debug!(cla = %format!("{frag_cla:02X}"), ins = %format!("{ins:02X}"), p1, p2, len = frag_data.len(), "apdu >>");

        let mut raw = transport.transmit(&frame)?;
        let (data_part, mut sw) = split_reply(&raw)?;
        let mut reply = data_part.to_vec();

        if !is_last {
            if sw != 0x9000 {
                return Err(PivError::apdu(sw));
            }
            continue;
        }

        // 0x6Cxx: wrong Le, retry once with the corrected length.
        if sw & 0xFF00 == 0x6C00 {
            let corrected_le = (sw & 0x00FF) as u8;
            let frame = encode_frame(*frag_cla, ins, p1, p2, frag_data, Some(corrected_le as u32), extended)?;
            raw = transport.transmit(&frame)?;
            let (data_part, sw2) = split_reply(&raw)?;
            reply = data_part.to_vec();
            sw = sw2;
        }

        // 0x61xx: more data available via GET RESPONSE.
        while sw & 0xFF00 == 0x6100 {
            let more = (sw & 0x00FF) as u32;
            let frame = encode_frame(0x00, INS_GET_RESPONSE, 0x00, 0x00, &[], Some(more), extended)?;
            let raw = transport.transmit(&frame)?;
            let (data_part, next_sw) = split_reply(&raw)?;
            reply.extend_from_slice(data_part);
            sw = next_sw;
        }

        final_reply = reply;
        final_sw = sw;
    }

    if final_sw != 0x9000 {
        warn!(sw = %format!("{final_sw:04X}"), "apdu << non-success status");
    }
    Ok((final_reply, final_sw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockCard;

    #[test]
    fn short_command_has_no_chain_bit() {
        let frags = chain_fragments(0x00, &[1, 2, 3]);
        assert_eq!(frags.len(), 1);
        assert_eq!(frags[0].0, 0x00);
    }

    #[test]
    fn long_command_chains_with_bit_on_all_but_last() {
        let data = vec![0xAAu8; 700];
        let frags = chain_fragments(0x00, &data);
        assert_eq!(frags.len(), 3);
        assert_eq!(frags[0].0 & CLA_CHAIN, CLA_CHAIN);
        assert_eq!(frags[1].0 & CLA_CHAIN, CLA_CHAIN);
        assert_eq!(frags[2].0 & CLA_CHAIN, 0);
        let total: usize = frags.iter().map(|(_, d)| d.len()).sum();
        assert_eq!(total, 700);
    }

    #[test]
    fn classify_status_maps_known_codes() {
        assert!(classify_status(0x9000).is_ok());
        assert_eq!(classify_status(0x6A82).unwrap_err().kind(), PivErrorKind::NotFound);
        assert_eq!(classify_status(0x63C2).unwrap_err().retries(), Some(2));
    }

    #[test]
    fn exchange_reassembles_chained_response() {
        let mut card = MockCard::new_blank();
        card.program_large_object(0xABCD, vec![0x42u8; 600]);
        let command_data = card.object_id_tlv(0xABCD);
        let (reply, sw) = exchange(&mut card, 0x00, 0xCB, 0x3F, 0xFF, &command_data, Some(0), false).unwrap();
        assert_eq!(sw, 0x9000);
        assert_eq!(reply.len(), 600);
    }
}
