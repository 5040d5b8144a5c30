//! Contract ABI lookup, call encoding and return-data decoding

use crate::error::RpcError;
use anyhow::Context;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha3::{Digest, Keccak256};
use std::path::Path;

const WORD: usize = 32;

/// Function parameter or return value
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AbiParam {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    /// Tuple members
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub components: Vec<AbiParam>,
}

impl AbiParam {
    /// Canonical type as used in signatures (`uint` -> `uint256`, tuples expanded)
    pub fn canonical_type(&self) -> String {
        if let Some(suffix) = self.kind.strip_prefix("tuple") {
            let inner: Vec<String> = self.components.iter().map(|c| c.canonical_type()).collect();
            return format!("({}){}", inner.join(","), suffix);
        }
        let (base, suffix) = match self.kind.find('[') {
            Some(pos) => self.kind.split_at(pos),
            None => (self.kind.as_str(), ""),
        };
        let base = match base {
            "uint" => "uint256",
            "int" => "int256",
            other => other,
        };
        format!("{}{}", base, suffix)
    }
}

/// One entry of a JSON ABI document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AbiEntry {
    #[serde(rename = "type", default = "default_entry_type")]
    pub entry_type: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub inputs: Vec<AbiParam>,
    #[serde(default)]
    pub outputs: Vec<AbiParam>,
    #[serde(
        rename = "stateMutability",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub state_mutability: Option<String>,
}

fn default_entry_type() -> String {
    "function".to_string()
}

/// JSON ABI document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(transparent)]
pub struct Abi {
    pub entries: Vec<AbiEntry>,
}

impl Abi {
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// First function entry named `name`
    pub fn function(&self, name: &str) -> Option<AbiFunction> {
        self.entries
            .iter()
            .find(|e| e.entry_type == "function" && e.name == name)
            .map(|e| AbiFunction {
                name: e.name.clone(),
                inputs: e.inputs.clone(),
                outputs: e.outputs.clone(),
            })
    }
}

/// Callable function fragment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbiFunction {
    pub name: String,
    pub inputs: Vec<AbiParam>,
    pub outputs: Vec<AbiParam>,
}

impl AbiFunction {
    /// Fragment for a zero-argument view returning `outputs`
    pub fn view(name: &str, outputs: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            inputs: Vec::new(),
            outputs: outputs
                .iter()
                .map(|kind| AbiParam {
                    name: String::new(),
                    kind: kind.to_string(),
                    components: Vec::new(),
                })
                .collect(),
        }
    }

    /// `name(type,...)`
    pub fn signature(&self) -> String {
        let inputs: Vec<String> = self.inputs.iter().map(|p| p.canonical_type()).collect();
        format!("{}({})", self.name, inputs.join(","))
    }

    /// First four bytes of the keccak-256 hash of the signature
    pub fn selector(&self) -> [u8; 4] {
        let hash = Keccak256::digest(self.signature().as_bytes());
        [hash[0], hash[1], hash[2], hash[3]]
    }

    /// Calldata for a call without arguments
    pub fn encode_call(&self) -> String {
        format!("0x{}", hex::encode(self.selector()))
    }

    /// Decode return data: no outputs yield null, one output its value, several a sequence.
    ///
    /// Integers decode to decimal strings, addresses and byte strings to
    /// lower-case hex, arrays and tuples to sequences of their members.
    pub fn decode_output(&self, data: &[u8]) -> Result<Value, RpcError> {
        let types = self
            .outputs
            .iter()
            .map(ParamType::from_param)
            .collect::<Result<Vec<_>, _>>()?;
        let mut values = decode_sequence(data, 0, types.iter())?;
        Ok(match values.len() {
            0 => Value::Null,
            1 => values.remove(0),
            _ => Value::Array(values),
        })
    }
}

/// Shape of an ABI type as far as decoding is concerned
#[derive(Debug, Clone, PartialEq, Eq)]
enum ParamType {
    Uint,
    Int,
    Bool,
    Address,
    FixedBytes(usize),
    Bytes,
    String,
    Array(Box<ParamType>),
    FixedArray(Box<ParamType>, usize),
    Tuple(Vec<ParamType>),
}

impl ParamType {
    fn from_param(param: &AbiParam) -> Result<Self, RpcError> {
        let unknown = || RpcError::Decode(format!("unknown type '{}'", param.kind));
        let (base, dims) = match param.kind.find('[') {
            Some(pos) => param.kind.split_at(pos),
            None => (param.kind.as_str(), ""),
        };

        let mut ty = if base == "tuple" {
            ParamType::Tuple(
                param
                    .components
                    .iter()
                    .map(ParamType::from_param)
                    .collect::<Result<_, _>>()?,
            )
        } else {
            ParamType::elementary(base).ok_or_else(unknown)?
        };

        // `T[2][]` is a dynamic array of `T[2]`
        for dim in dims.split_terminator(']') {
            let size = dim.strip_prefix('[').ok_or_else(unknown)?;
            ty = if size.is_empty() {
                ParamType::Array(Box::new(ty))
            } else {
                ParamType::FixedArray(Box::new(ty), size.parse().map_err(|_| unknown())?)
            };
        }
        Ok(ty)
    }

    fn elementary(name: &str) -> Option<Self> {
        match name {
            "bool" => Some(Self::Bool),
            "address" => Some(Self::Address),
            "string" => Some(Self::String),
            "bytes" => Some(Self::Bytes),
            _ => {
                if let Some(bits) = name.strip_prefix("uint") {
                    valid_bits(bits).then_some(Self::Uint)
                } else if let Some(bits) = name.strip_prefix("int") {
                    valid_bits(bits).then_some(Self::Int)
                } else if let Some(size) = name.strip_prefix("bytes") {
                    size.parse::<usize>()
                        .ok()
                        .filter(|n| (1..=WORD).contains(n))
                        .map(Self::FixedBytes)
                } else {
                    None
                }
            }
        }
    }

    fn is_dynamic(&self) -> bool {
        match self {
            Self::Bytes | Self::String | Self::Array(_) => true,
            Self::FixedArray(inner, _) => inner.is_dynamic(),
            Self::Tuple(members) => members.iter().any(Self::is_dynamic),
            _ => false,
        }
    }

    /// Bytes taken in the head of the enclosing sequence
    fn head_size(&self) -> Result<usize, RpcError> {
        if self.is_dynamic() {
            return Ok(WORD);
        }
        match self {
            Self::FixedArray(inner, len) => inner
                .head_size()?
                .checked_mul(*len)
                .ok_or_else(overflow),
            Self::Tuple(members) => members
                .iter()
                .try_fold(0usize, |acc, member| checked_add(acc, member.head_size()?)),
            _ => Ok(WORD),
        }
    }
}

fn valid_bits(bits: &str) -> bool {
    bits.is_empty()
        || bits
            .parse::<usize>()
            .map_or(false, |b| b % 8 == 0 && (8..=256).contains(&b))
}

fn overflow() -> RpcError {
    RpcError::Decode("offset overflows return data".to_string())
}

fn checked_add(a: usize, b: usize) -> Result<usize, RpcError> {
    a.checked_add(b).ok_or_else(overflow)
}

fn word(data: &[u8], offset: usize) -> Result<&[u8], RpcError> {
    let end = checked_add(offset, WORD)?;
    data.get(offset..end).ok_or_else(|| {
        RpcError::Decode(format!(
            "return data too short: need {} bytes, got {}",
            end,
            data.len()
        ))
    })
}

fn word_as_usize(data: &[u8], offset: usize) -> Result<usize, RpcError> {
    let w = word(data, offset)?;
    if w[..WORD - 8].iter().any(|b| *b != 0) {
        return Err(RpcError::Decode(format!("offset at {} out of range", offset)));
    }
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&w[WORD - 8..]);
    usize::try_from(u64::from_be_bytes(buf)).map_err(|_| overflow())
}

fn length_prefixed(data: &[u8], at: usize) -> Result<&[u8], RpcError> {
    let len = word_as_usize(data, at)?;
    let start = checked_add(at, WORD)?;
    data.get(start..checked_add(start, len)?)
        .ok_or_else(|| RpcError::Decode("dynamic value exceeds return data".to_string()))
}

fn hex_value(bytes: &[u8]) -> Value {
    Value::String(format!("0x{}", hex::encode(bytes)))
}

/// Decode consecutive values whose head starts at `base`. Dynamic members
/// hold an offset relative to `base`.
fn decode_sequence<'a>(
    data: &[u8],
    base: usize,
    types: impl Iterator<Item = &'a ParamType>,
) -> Result<Vec<Value>, RpcError> {
    let mut values = Vec::new();
    let mut head = base;
    for ty in types {
        let value = if ty.is_dynamic() {
            let offset = word_as_usize(data, head)?;
            decode_value(data, checked_add(base, offset)?, ty)?
        } else {
            decode_value(data, head, ty)?
        };
        values.push(value);
        head = checked_add(head, ty.head_size()?)?;
    }
    Ok(values)
}

/// Decode one value encoded at `at`
fn decode_value(data: &[u8], at: usize, ty: &ParamType) -> Result<Value, RpcError> {
    match ty {
        ParamType::Bool => Ok(Value::Bool(word(data, at)?[WORD - 1] != 0)),
        ParamType::Address => Ok(hex_value(&word(data, at)?[WORD - 20..])),
        ParamType::Uint => Ok(Value::String(to_decimal(word(data, at)?))),
        ParamType::Int => {
            let w = word(data, at)?;
            if w[0] & 0x80 == 0 {
                Ok(Value::String(to_decimal(w)))
            } else {
                Ok(Value::String(format!("-{}", to_decimal(&twos_complement(w)))))
            }
        }
        ParamType::FixedBytes(size) => Ok(hex_value(&word(data, at)?[..*size])),
        ParamType::Bytes => Ok(hex_value(length_prefixed(data, at)?)),
        ParamType::String => Ok(Value::String(
            String::from_utf8_lossy(length_prefixed(data, at)?).into_owned(),
        )),
        ParamType::Array(inner) => {
            let len = word_as_usize(data, at)?;
            // Every element takes at least one word
            if len > data.len() / WORD {
                return Err(RpcError::Decode(format!(
                    "array length {} exceeds return data",
                    len
                )));
            }
            let items = std::iter::repeat(inner.as_ref()).take(len);
            Ok(Value::Array(decode_sequence(data, checked_add(at, WORD)?, items)?))
        }
        ParamType::FixedArray(inner, len) => {
            let items = std::iter::repeat(inner.as_ref()).take(*len);
            Ok(Value::Array(decode_sequence(data, at, items)?))
        }
        ParamType::Tuple(members) => Ok(Value::Array(decode_sequence(data, at, members.iter())?)),
    }
}

fn twos_complement(w: &[u8]) -> Vec<u8> {
    let mut out: Vec<u8> = w.iter().map(|b| !b).collect();
    for byte in out.iter_mut().rev() {
        let (sum, overflow) = byte.overflowing_add(1);
        *byte = sum;
        if !overflow {
            break;
        }
    }
    out
}

/// Big-endian unsigned bytes to a decimal string
pub fn to_decimal(bytes: &[u8]) -> String {
    // Little-endian base-10 digits
    let mut digits: Vec<u8> = vec![0];
    for &byte in bytes {
        let mut carry = byte as u32;
        for digit in digits.iter_mut() {
            let v = (*digit as u32) * 256 + carry;
            *digit = (v % 10) as u8;
            carry = v / 10;
        }
        while carry > 0 {
            digits.push((carry % 10) as u8);
            carry /= 10;
        }
    }
    digits.iter().rev().map(|d| (b'0' + d) as char).collect()
}

/// ABI documents by identifier
#[derive(Default)]
pub struct AbiRegistry {
    abis: DashMap<String, Abi>,
}

impl AbiRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: &str, abi: Abi) {
        self.abis.insert(name.to_string(), abi);
    }

    pub fn get(&self, name: &str) -> Option<Abi> {
        self.abis.get(name).map(|entry| entry.clone())
    }

    pub fn len(&self) -> usize {
        self.abis.len()
    }

    pub fn is_empty(&self) -> bool {
        self.abis.is_empty()
    }

    /// Register every `*.json` file in `dir` under its file stem
    pub fn load_dir(&self, dir: &Path) -> anyhow::Result<usize> {
        if !dir.exists() {
            return Ok(0);
        }

        let mut loaded = 0;
        for entry in std::fs::read_dir(dir).context("Failed to read ABI directory")? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read ABI file {}", path.display()))?;
            let abi = Abi::from_json(&content)
                .with_context(|| format!("Failed to parse ABI file {}", path.display()))?;
            self.register(name, abi);
            loaded += 1;
        }

        tracing::info!(count = loaded, dir = %dir.display(), "Loaded contract ABIs");
        Ok(loaded)
    }
}
