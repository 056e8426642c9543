//! Minimal Solidity ABI encoding for the streaming contract's six functions.
//!
//! Every argument and return value is a single static 32-byte word, so no
//! dynamic-type encoding is needed.

use sha3::{Digest, Keccak256};

use crate::address::{Address, ADDRESS_LEN};
use crate::stream::{Stream, StreamId};

const WORD: usize = 32;

pub const NEXT_STREAM_ID: &str = "nextStreamId()";
pub const STREAMS: &str = "streams(uint256)";
pub const GET_AVAILABLE: &str = "getAvailable(uint256)";
pub const CREATE_STREAM: &str = "createStream(address,uint256)";
pub const WITHDRAW: &str = "withdraw(uint256)";
pub const CANCEL_STREAM: &str = "cancelStream(uint256)";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AbiError {
    #[error("return data too short: need {need} bytes, got {got}")]
    TooShort { need: usize, got: usize },
    #[error("value in word {0} does not fit the expected type")]
    OutOfRange(usize),
    #[error("word {0} is not a valid address")]
    BadAddress(usize),
    #[error("word {0} is not a valid bool")]
    BadBool(usize),
    #[error("invalid hex data: {0}")]
    BadHex(String),
}

/// First four bytes of the Keccak-256 hash of a function signature.
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = Keccak256::digest(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

fn uint_word(value: u128) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    word[16..].copy_from_slice(&value.to_be_bytes());
    word
}

fn address_word(address: &Address) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    word[WORD - ADDRESS_LEN..].copy_from_slice(address.as_bytes());
    word
}

fn call(signature: &str, words: &[[u8; WORD]]) -> Vec<u8> {
    let mut data = Vec::with_capacity(4 + words.len() * WORD);
    data.extend_from_slice(&selector(signature));
    for w in words {
        data.extend_from_slice(w);
    }
    data
}

pub fn encode_next_stream_id() -> Vec<u8> {
    call(NEXT_STREAM_ID, &[])
}

pub fn encode_streams(id: StreamId) -> Vec<u8> {
    call(STREAMS, &[uint_word(id.into())])
}

pub fn encode_get_available(id: StreamId) -> Vec<u8> {
    call(GET_AVAILABLE, &[uint_word(id.into())])
}

pub fn encode_create_stream(employee: &Address, duration_secs: u64) -> Vec<u8> {
    call(
        CREATE_STREAM,
        &[address_word(employee), uint_word(duration_secs.into())],
    )
}

pub fn encode_withdraw(id: StreamId) -> Vec<u8> {
    call(WITHDRAW, &[uint_word(id.into())])
}

pub fn encode_cancel_stream(id: StreamId) -> Vec<u8> {
    call(CANCEL_STREAM, &[uint_word(id.into())])
}

fn word(data: &[u8], index: usize) -> Result<&[u8], AbiError> {
    let end = (index + 1) * WORD;
    if data.len() < end {
        return Err(AbiError::TooShort {
            need: end,
            got: data.len(),
        });
    }
    Ok(&data[index * WORD..end])
}

/// Decode word `index` as a uint256 that must fit in 128 bits.
pub fn decode_uint(data: &[u8], index: usize) -> Result<u128, AbiError> {
    let w = word(data, index)?;
    if w[..16].iter().any(|&b| b != 0) {
        return Err(AbiError::OutOfRange(index));
    }
    let mut buf = [0u8; 16];
    buf.copy_from_slice(&w[16..]);
    Ok(u128::from_be_bytes(buf))
}

pub fn decode_u64(data: &[u8], index: usize) -> Result<u64, AbiError> {
    u64::try_from(decode_uint(data, index)?).map_err(|_| AbiError::OutOfRange(index))
}

pub fn decode_address(data: &[u8], index: usize) -> Result<Address, AbiError> {
    let w = word(data, index)?;
    if w[..WORD - ADDRESS_LEN].iter().any(|&b| b != 0) {
        return Err(AbiError::BadAddress(index));
    }
    let mut bytes = [0u8; ADDRESS_LEN];
    bytes.copy_from_slice(&w[WORD - ADDRESS_LEN..]);
    Ok(Address::new(bytes))
}

pub fn decode_bool(data: &[u8], index: usize) -> Result<bool, AbiError> {
    match decode_uint(data, index) {
        Ok(0) => Ok(false),
        Ok(1) => Ok(true),
        _ => Err(AbiError::BadBool(index)),
    }
}

/// Decode the `streams(uint256)` return tuple
/// `(address,address,uint256,uint256,uint256,uint256,bool)`.
pub fn decode_stream(id: StreamId, data: &[u8]) -> Result<Stream, AbiError> {
    Ok(Stream {
        id,
        employer: decode_address(data, 0)?,
        employee: decode_address(data, 1)?,
        total_amount: decode_uint(data, 2)?,
        start_time: decode_u64(data, 3)?,
        duration: decode_u64(data, 4)?,
        withdrawn_amount: decode_uint(data, 5)?,
        is_active: decode_bool(data, 6)?,
    })
}

/// Encode a stream record the way the contract returns it.
pub fn encode_stream_return(stream: &Stream) -> Vec<u8> {
    [
        address_word(&stream.employer),
        address_word(&stream.employee),
        uint_word(stream.total_amount),
        uint_word(stream.start_time.into()),
        uint_word(stream.duration.into()),
        uint_word(stream.withdrawn_amount),
        uint_word(u128::from(stream.is_active)),
    ]
    .concat()
}

/// Encode a single uint256 return value.
pub fn encode_uint_return(value: u128) -> Vec<u8> {
    uint_word(value).to_vec()
}

/// `0x`-prefixed hex of raw bytes.
pub fn to_hex_data(data: &[u8]) -> String {
    format!("0x{}", hex::encode(data))
}

pub fn parse_hex_data(s: &str) -> Result<Vec<u8>, AbiError> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(digits).map_err(|e| AbiError::BadHex(e.to_string()))
}

/// JSON-RPC quantity encoding: `0x`-prefixed hex with no leading zeros.
pub fn to_quantity(value: u128) -> String {
    format!("{value:#x}")
}

pub fn parse_quantity(s: &str) -> Result<u128, AbiError> {
    let digits = s
        .strip_prefix("0x")
        .ok_or_else(|| AbiError::BadHex(s.to_string()))?;
    if digits.is_empty() {
        return Ok(0);
    }
    u128::from_str_radix(digits, 16).map_err(|e| AbiError::BadHex(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_selectors() {
        assert_eq!(hex::encode(selector("withdraw(uint256)")), "2e1a7d4d");
        assert_eq!(hex::encode(selector("transfer(address,uint256)")), "a9059cbb");
        assert_eq!(hex::encode(selector("balanceOf(address)")), "70a08231");
    }

    #[test]
    fn test_encode_create_stream_layout() {
        let employee = Address::repeat_byte(0xab);
        let data = encode_create_stream(&employee, 86_400);
        assert_eq!(data.len(), 4 + 2 * WORD);
        assert_eq!(&data[..4], &selector(CREATE_STREAM));
        assert!(data[4..16].iter().all(|&b| b == 0));
        assert_eq!(&data[16..36], employee.as_bytes());
        assert_eq!(decode_u64(&data[4..], 1).unwrap(), 86_400);
    }

    #[test]
    fn test_stream_tuple_decodes() {
        let stream = Stream {
            id: 7,
            employer: Address::repeat_byte(1),
            employee: Address::repeat_byte(2),
            total_amount: 10u128.pow(21),
            start_time: 1_700_000_000,
            duration: 2_592_000,
            withdrawn_amount: 5,
            is_active: true,
        };
        let data = encode_stream_return(&stream);
        assert_eq!(decode_stream(7, &data).unwrap(), stream);
    }

    #[test]
    fn test_decode_rejects_bad_words() {
        let mut data = vec![0u8; WORD];
        data[0] = 1;
        assert_eq!(decode_uint(&data, 0), Err(AbiError::OutOfRange(0)));
        assert_eq!(decode_address(&data, 0), Err(AbiError::BadAddress(0)));

        let two = encode_uint_return(2);
        assert_eq!(decode_bool(&two, 0), Err(AbiError::BadBool(0)));

        assert_eq!(
            decode_stream(0, &[0u8; 64]),
            Err(AbiError::TooShort { need: 96, got: 64 })
        );
    }

    #[test]
    fn test_quantities() {
        assert_eq!(to_quantity(0), "0x0");
        assert_eq!(to_quantity(44_787), "0xaef3");
        assert_eq!(parse_quantity("0xaef3").unwrap(), 44_787);
        assert_eq!(parse_quantity("0x").unwrap(), 0);
        assert!(parse_quantity("aef3").is_err());
        assert_eq!(parse_hex_data("0x0102").unwrap(), vec![1, 2]);
        assert_eq!(to_hex_data(&[0xde, 0xad]), "0xdead");
    }
}
