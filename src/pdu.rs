//! GSM 03.40 PDU decoding: SMSC/originator address, DCS-selected payload
//! (GSM 7-bit or UCS-2), semi-octet BCD timestamps, and UDH-based
//! concatenated-SMS reference extraction.
//!
//! Pure functions only — no I/O. Any decode failure yields a sentinel
//! [`DecodedSms`] rather than propagating an error, matching the source
//! system's "never raise on a malformed PDU" behavior.

use chrono::{DateTime, Utc};

/// Concatenation metadata extracted from a UDH, when present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partial {
    pub reference: u16,
    pub parts_count: u8,
    pub part_number: u8,
}

/// A decoded incoming SMS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedSms {
    pub sender: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub partial: Option<Partial>,
}

const GSM7_ALPHABET: [char; 128] = [
    '@', '£', '$', '¥', 'è', 'é', 'ù', 'ì', 'ò', 'Ç', '\n', 'Ø', 'ø', '\r', 'Å', 'å', 'Δ', '_',
    'Φ', 'Γ', 'Λ', 'Ω', 'Π', 'Ψ', 'Σ', 'Θ', 'Ξ', '\u{1b}', 'Æ', 'æ', 'ß', 'É', ' ', '!', '"', '#',
    '¤', '%', '&', '\'', '(', ')', '*', '+', ',', '-', '.', '/', '0', '1', '2', '3', '4', '5',
    '6', '7', '8', '9', ':', ';', '<', '=', '>', '?', '¡', 'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H',
    'I', 'J', 'K', 'L', 'M', 'N', 'O', 'P', 'Q', 'R', 'S', 'T', 'U', 'V', 'W', 'X', 'Y', 'Z', 'Ä',
    'Ö', 'Ñ', 'Ü', '§', '¿', 'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k', 'l', 'm', 'n',
    'o', 'p', 'q', 'r', 's', 't', 'u', 'v', 'w', 'x', 'y', 'z', 'ä', 'ö', 'ñ', 'ü', 'à',
];

fn gsm7_lookup(code: u8) -> char {
    GSM7_ALPHABET.get(code as usize).copied().unwrap_or('?')
}

/// Decode a hex PDU string into an [`DecodedSms`], never failing: any
/// indexing/format error produces the sentinel record described in
/// spec §4.1.
pub fn decode_pdu(hex: &str) -> DecodedSms {
    match try_decode_pdu(hex) {
        Ok(sms) => sms,
        Err(_) => DecodedSms {
            sender: "unknown".to_string(),
            content: format!("PDU decode failed: {hex}"),
            timestamp: Utc::now(),
            partial: None,
        },
    }
}

fn try_decode_pdu(hex: &str) -> Result<DecodedSms, String> {
    if hex.is_empty() || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err("not a hex string".to_string());
    }
    let bytes = hex_to_bytes(hex)?;
    let mut cur = Cursor { bytes: &bytes, pos: 0 };

    // SMSC: first byte is length L (address length in octets), skip 1 + L.
    let smsc_len = cur.take_u8()? as usize;
    cur.skip(smsc_len)?;

    // PDU type byte: bit 6 (0x40) is UDH-present flag.
    let pdu_type = cur.take_u8()?;
    let udh_present = pdu_type & 0x40 != 0;

    // Originator address.
    let addr_digit_len = cur.take_u8()? as usize;
    let _addr_type = cur.take_u8()?;
    let addr_octets = addr_digit_len.div_ceil(2);
    let addr_bytes = cur.take_n(addr_octets)?;
    let sender = decode_semi_octet_digits(addr_bytes, addr_digit_len);

    // PID
    cur.take_u8()?;

    // DCS
    let dcs = cur.take_u8()?;
    let is_ucs2 = (dcs & 0x0f) == 0x08;

    // Timestamp: 7 semi-octet BCD bytes.
    let ts_bytes = cur.take_n(7)?;
    let timestamp = decode_timestamp(ts_bytes).unwrap_or_else(Utc::now);

    // User data length (in septets for GSM7, in octets for UCS-2/8-bit).
    let udl = cur.take_u8()? as usize;

    let mut partial = None;
    let mut udh_bit_len = 0usize;
    if udh_present {
        let udh_len = cur.take_u8()? as usize;
        let udh_bytes = cur.take_n(udh_len)?;
        partial = parse_udh(udh_bytes);
        udh_bit_len = (udh_len + 1) * 8;
    }

    let content = if is_ucs2 {
        let remaining = cur.remaining();
        decode_ucs2(remaining)
    } else {
        let remaining = cur.remaining();
        decode_gsm7(remaining, udl, udh_bit_len)
    };

    Ok(DecodedSms {
        sender,
        content,
        timestamp,
        partial,
    })
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take_u8(&mut self) -> Result<u8, String> {
        let b = *self.bytes.get(self.pos).ok_or("unexpected end of PDU")?;
        self.pos += 1;
        Ok(b)
    }

    fn take_n(&mut self, n: usize) -> Result<&'a [u8], String> {
        let end = self.pos.checked_add(n).ok_or("overflow")?;
        let slice = self.bytes.get(self.pos..end).ok_or("unexpected end of PDU")?;
        self.pos = end;
        Ok(slice)
    }

    fn skip(&mut self, n: usize) -> Result<(), String> {
        self.take_n(n).map(|_| ())
    }

    fn remaining(&self) -> &'a [u8] {
        &self.bytes[self.pos.min(self.bytes.len())..]
    }
}

fn hex_to_bytes(hex: &str) -> Result<Vec<u8>, String> {
    if hex.len() % 2 != 0 {
        return Err("odd-length hex string".to_string());
    }
    let mut out = Vec::with_capacity(hex.len() / 2);
    let bytes = hex.as_bytes();
    for chunk in bytes.chunks(2) {
        let hi = (chunk[0] as char).to_digit(16).ok_or("bad hex digit")?;
        let lo = (chunk[1] as char).to_digit(16).ok_or("bad hex digit")?;
        out.push(((hi << 4) | lo) as u8);
    }
    Ok(out)
}

/// Decode semi-octet digits (low nibble first, then high nibble) into a
/// phone number string, stopping early if a nibble is not a valid digit
/// (the 0x0F filler nibble on odd-length addresses, or anything > 9).
fn decode_semi_octet_digits(bytes: &[u8], digit_len: usize) -> String {
    let mut digits = String::with_capacity(digit_len);
    'outer: for &b in bytes {
        for nibble in [b & 0x0f, b >> 4] {
            if digits.len() >= digit_len {
                break 'outer;
            }
            if nibble > 9 {
                break 'outer;
            }
            digits.push((b'0' + nibble) as char);
        }
    }
    digits
}

/// Decode a 7-byte semi-octet BCD timestamp: YY MM DD hh mm ss (timezone
/// byte ignored). Each byte is `low_nibble*10 + high_nibble`.
fn decode_timestamp(bytes: &[u8]) -> Option<DateTime<Utc>> {
    if bytes.len() < 6 {
        return None;
    }
    let field = |b: u8| -> Option<u32> {
        let lo = (b & 0x0f) as u32;
        let hi = (b >> 4) as u32;
        if lo > 9 || hi > 9 {
            return None;
        }
        Some(lo * 10 + hi)
    };
    let yy = field(bytes[0])?;
    let mm = field(bytes[1])?;
    let dd = field(bytes[2])?;
    let hh = field(bytes[3])?;
    let mi = field(bytes[4])?;
    let ss = field(bytes[5])?;
    let year = 2000 + yy as i32;
    chrono::NaiveDate::from_ymd_opt(year, mm, dd)
        .and_then(|d| d.and_hms_opt(hh, mi, ss))
        .map(|dt| dt.and_utc())
}

/// Parse a UDH byte slice for IEI `0x00` (8-bit ref) or `0x08` (16-bit ref)
/// concatenation elements.
fn parse_udh(udh: &[u8]) -> Option<Partial> {
    let mut i = 0;
    while i + 1 < udh.len() {
        let iei = udh[i];
        let iel = udh[i + 1] as usize;
        let data_start = i + 2;
        let data_end = data_start + iel;
        if data_end > udh.len() {
            break;
        }
        let data = &udh[data_start..data_end];
        match iei {
            0x00 if data.len() >= 3 => {
                return Some(Partial {
                    reference: data[0] as u16,
                    parts_count: data[1],
                    part_number: data[2],
                });
            }
            0x08 if data.len() >= 4 => {
                let reference = ((data[0] as u16) << 8) | data[1] as u16;
                return Some(Partial {
                    reference,
                    parts_count: data[2],
                    part_number: data[3],
                });
            }
            _ => {}
        }
        i = data_end;
    }
    None
}

fn decode_ucs2(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|c| u16::from_be_bytes([c[0], c[1]]))
        .collect();
    char::decode_utf16(units)
        .map(|r| r.unwrap_or('\u{fffd}'))
        .collect()
}

/// Unpack GSM 7-bit septets into characters. `udl` is the declared
/// user-data length (septet count when no UDH, otherwise the UDH-inclusive
/// septet count per 3GPP TS 23.040). `udh_bit_len` is the number of bits
/// the UDH itself occupied once unpacked as septets, used to compute the
/// fill-bit padding that keeps the remaining septet stream byte-aligned
/// (TS 23.038 §6.1.2.3).
fn decode_gsm7(bytes: &[u8], udl: usize, udh_bit_len: usize) -> String {
    let fill_bits = if udh_bit_len > 0 {
        let rem = udh_bit_len % 7;
        if rem == 0 { 0 } else { 7 - rem }
    } else {
        0
    };
    let udh_septets = if udh_bit_len > 0 {
        (udh_bit_len + fill_bits) / 7
    } else {
        0
    };
    let payload_septets = udl.saturating_sub(udh_septets);

    // Flatten to a bit stream (LSB-first per octet, per GSM 03.38 packing),
    // then drop exactly `fill_bits` bits so septet boundaries realign after
    // the octet-aligned UDH — not a whole septet, per TS 23.038 §6.1.2.3.
    let mut bits: Vec<u8> = Vec::with_capacity(bytes.len() * 8);
    for &b in bytes {
        for i in 0..8 {
            bits.push((b >> i) & 1);
        }
    }
    let bits = if fill_bits <= bits.len() { &bits[fill_bits..] } else { &[] };

    bits.chunks(7)
        .filter(|chunk| chunk.len() == 7)
        .take(payload_septets)
        .map(|chunk| {
            let mut v = 0u8;
            for (i, &bit) in chunk.iter().enumerate() {
                v |= bit << i;
            }
            v
        })
        .map(gsm7_lookup)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_simple_gsm7_pdu() {
        // SMSC len 0, pdu_type 04 (no UDH), addr len 11 (13800138000),
        // type 91, addr octets, PID 00, DCS 00 (GSM7), timestamp 7 bytes,
        // UDL 5, payload "Hello" in GSM7 septets.
        let sender_digits = "13800138000";
        let addr_bytes = encode_semi_octets(sender_digits);
        let addr_len = sender_digits.len();
        let ts = [0x11, 0x21, 0x30, 0x01, 0x10, 0x38, 0x00];
        let payload = encode_gsm7("Hello");
        let mut pdu = vec![0x00u8, 0x04, addr_len as u8, 0x91];
        pdu.extend_from_slice(&addr_bytes);
        pdu.push(0x00); // PID
        pdu.push(0x00); // DCS
        pdu.extend_from_slice(&ts);
        pdu.push(5); // UDL = 5 septets
        pdu.extend_from_slice(&payload);
        let hex_pdu: String = pdu.iter().map(|b| format!("{b:02X}")).collect();
        let sms = decode_pdu(&hex_pdu);
        assert_eq!(sms.sender, "13800138000");
        assert_eq!(sms.content, "Hello");
        assert!(sms.partial.is_none());
    }

    #[test]
    fn decodes_ucs2_pdu() {
        let sender_digits = "8613900000000";
        let addr_bytes = encode_semi_octets(sender_digits);
        let ts = [0x11, 0x21, 0x30, 0x01, 0x10, 0x38, 0x00];
        let text = "\u{4f60}\u{597d}"; // "你好"
        let payload: Vec<u8> = text.encode_utf16().flat_map(|u| u.to_be_bytes()).collect();
        let mut pdu = vec![0x00u8, 0x04, sender_digits.len() as u8, 0x91];
        pdu.extend_from_slice(&addr_bytes);
        pdu.push(0x00);
        pdu.push(0x08); // DCS UCS-2
        pdu.extend_from_slice(&ts);
        pdu.push(payload.len() as u8);
        pdu.extend_from_slice(&payload);
        let hex_pdu: String = pdu.iter().map(|b| format!("{b:02X}")).collect();
        let sms = decode_pdu(&hex_pdu);
        assert_eq!(sms.content, text);
    }

    #[test]
    fn decodes_concatenated_udh() {
        let sender_digits = "13800138000";
        let addr_bytes = encode_semi_octets(sender_digits);
        let ts = [0x11, 0x21, 0x30, 0x01, 0x10, 0x38, 0x00];
        let udh = [0x00u8, 0x03, 0x2a, 0x03, 0x02]; // IEI 00, len 3, ref 42, total 3, part 2
        let udhl = udh.len() as u8; // 0x05: the UDHL byte itself, ahead of the IEs
        let udh_bit_len = (udh.len() + 1) * 8;
        let fill_bits = {
            let rem = udh_bit_len % 7;
            if rem == 0 { 0 } else { 7 - rem }
        };
        let payload = encode_gsm7_with_fill("part2text", fill_bits);
        let udh_septets = (udh_bit_len + fill_bits) / 7;
        let udl = udh_septets + 9; // "part2text" is 9 chars
        let mut pdu = vec![0x00u8, 0x44, sender_digits.len() as u8, 0x91];
        pdu.extend_from_slice(&addr_bytes);
        pdu.push(0x00);
        pdu.push(0x00); // DCS GSM7
        pdu.extend_from_slice(&ts);
        pdu.push(udl as u8);
        pdu.push(udhl);
        pdu.extend_from_slice(&udh);
        pdu.extend_from_slice(&payload);
        let hex_pdu: String = pdu.iter().map(|b| format!("{b:02X}")).collect();
        let sms = decode_pdu(&hex_pdu);
        let partial = sms.partial.expect("expected partial metadata");
        assert_eq!(partial.reference, 42);
        assert_eq!(partial.parts_count, 3);
        assert_eq!(partial.part_number, 2);
        assert_eq!(sms.content, "part2text");
    }

    #[test]
    fn malformed_hex_yields_sentinel() {
        let sms = decode_pdu("zzz");
        assert_eq!(sms.sender, "unknown");
        assert!(sms.content.starts_with("PDU decode failed"));
    }

    #[test]
    fn truncated_pdu_yields_sentinel() {
        let sms = decode_pdu("00");
        assert_eq!(sms.sender, "unknown");
    }

    // --- test helpers: encode the inverse direction for fixture construction ---

    fn encode_semi_octets(digits: &str) -> Vec<u8> {
        let mut out = Vec::new();
        let chars: Vec<u8> = digits.bytes().map(|b| b - b'0').collect();
        let mut iter = chars.chunks(2);
        for pair in &mut iter {
            let lo = pair[0];
            let hi = pair.get(1).copied().unwrap_or(0x0f);
            out.push((hi << 4) | lo);
        }
        out
    }

    fn encode_gsm7(text: &str) -> Vec<u8> {
        let septets: Vec<u8> = text
            .chars()
            .map(|c| {
                GSM7_ALPHABET
                    .iter()
                    .position(|&g| g == c)
                    .map(|p| p as u8)
                    .unwrap_or(b'?')
            })
            .collect();
        let mut out = Vec::new();
        let mut acc: u32 = 0;
        let mut acc_bits = 0u32;
        for s in septets {
            acc |= (s as u32) << acc_bits;
            acc_bits += 7;
            while acc_bits >= 8 {
                out.push((acc & 0xff) as u8);
                acc >>= 8;
                acc_bits -= 8;
            }
        }
        if acc_bits > 0 {
            out.push((acc & 0xff) as u8);
        }
        out
    }

    /// Same as `encode_gsm7`, but prefixes `fill_bits` zero bits before the
    /// septet stream, mirroring how a real encoder pads a UDH up to the
    /// next septet boundary.
    fn encode_gsm7_with_fill(text: &str, fill_bits: usize) -> Vec<u8> {
        let septets: Vec<u8> = text
            .chars()
            .map(|c| {
                GSM7_ALPHABET
                    .iter()
                    .position(|&g| g == c)
                    .map(|p| p as u8)
                    .unwrap_or(b'?')
            })
            .collect();
        let mut bits: Vec<u8> = vec![0; fill_bits];
        for s in septets {
            for i in 0..7 {
                bits.push((s >> i) & 1);
            }
        }
        while bits.len() % 8 != 0 {
            bits.push(0);
        }
        bits.chunks(8)
            .map(|chunk| {
                let mut b = 0u8;
                for (i, &bit) in chunk.iter().enumerate() {
                    b |= bit << i;
                }
                b
            })
            .collect()
    }
}
