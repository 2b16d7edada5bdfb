//! # Cache keys
//!
//! A key identifies "same computation, same arguments, same build". The
//! builder serializes its inputs into a length-prefixed, type-tagged byte
//! sequence and hashes that with SHA-256. The serialization is prefix free,
//! so distinct inputs never share a preimage; the hash only bounds key size.
//!
//! ```
//! use usecache_core::keys::{CacheArg, CacheKeyBuilder};
//!
//! let key = CacheKeyBuilder::new("v1", "getUser")
//!     .args(vec![CacheArg::from("42")])
//!     .build()
//!     .unwrap();
//! let again = CacheKeyBuilder::new("v1", "getUser")
//!     .args(vec![CacheArg::from("42")])
//!     .build()
//!     .unwrap();
//! assert_eq!(key, again);
//! ```

use std::collections::BTreeMap;
use std::fmt;

use bytes::Bytes;
use sha2::{Digest, Sha256};

use crate::error::KeyError;
use crate::params::{ParamValue, RouteParam};

/// An argument value passed to a cached computation.
///
/// Arguments are plain data: whatever a computation needs from its caller has
/// to be expressible here so that it can take part in the key.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheArg {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(String),
    Bytes(Bytes),
    List(Vec<CacheArg>),
    Map(BTreeMap<String, CacheArg>),
    Param(RouteParam),
}

impl CacheArg {
    pub fn bytes(value: impl Into<Bytes>) -> Self {
        CacheArg::Bytes(value.into())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            CacheArg::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            CacheArg::Int(v) => Some(*v),
            CacheArg::UInt(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_param(&self) -> Option<&RouteParam> {
        match self {
            CacheArg::Param(p) => Some(p),
            _ => None,
        }
    }

    /// Returns the name of the first fallback parameter found, depth first.
    pub fn find_fallback(&self) -> Option<&str> {
        match self {
            CacheArg::Param(p) if p.is_fallback() => Some(p.name()),
            CacheArg::List(items) => items.iter().find_map(CacheArg::find_fallback),
            CacheArg::Map(map) => map.values().find_map(CacheArg::find_fallback),
            _ => None,
        }
    }
}

macro_rules! impl_from_signed {
    ($($t:ty),*) => {
        $(impl From<$t> for CacheArg {
            fn from(v: $t) -> Self {
                CacheArg::Int(i64::from(v))
            }
        })*
    };
}

macro_rules! impl_from_unsigned {
    ($($t:ty),*) => {
        $(impl From<$t> for CacheArg {
            fn from(v: $t) -> Self {
                CacheArg::UInt(u64::from(v))
            }
        })*
    };
}

impl_from_signed!(i8, i16, i32, i64);
impl_from_unsigned!(u16, u32, u64);

impl From<usize> for CacheArg {
    fn from(v: usize) -> Self {
        CacheArg::UInt(v as u64)
    }
}

impl From<bool> for CacheArg {
    fn from(v: bool) -> Self {
        CacheArg::Bool(v)
    }
}

impl From<f64> for CacheArg {
    fn from(v: f64) -> Self {
        CacheArg::Float(v)
    }
}

impl From<&str> for CacheArg {
    fn from(v: &str) -> Self {
        CacheArg::Str(v.to_string())
    }
}

impl From<String> for CacheArg {
    fn from(v: String) -> Self {
        CacheArg::Str(v)
    }
}

impl From<Bytes> for CacheArg {
    fn from(v: Bytes) -> Self {
        CacheArg::Bytes(v)
    }
}

impl From<RouteParam> for CacheArg {
    fn from(v: RouteParam) -> Self {
        CacheArg::Param(v)
    }
}

impl<T: Into<CacheArg>> From<Vec<T>> for CacheArg {
    fn from(v: Vec<T>) -> Self {
        CacheArg::List(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<CacheArg>> From<Option<T>> for CacheArg {
    fn from(v: Option<T>) -> Self {
        v.map_or(CacheArg::Null, Into::into)
    }
}

impl<T: Into<CacheArg>> From<BTreeMap<String, T>> for CacheArg {
    fn from(v: BTreeMap<String, T>) -> Self {
        CacheArg::Map(v.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}

/// How the builder treats arguments that are fallback route parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FallbackParams {
    /// Abort with [`KeyError::DynamicAccess`].
    #[default]
    Reject,
    /// Encode the parameter by name. Used for page and layout entry points,
    /// whose key must exist even when the route is not fully known.
    EncodeByName,
}

/// Opaque cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Builds a [`CacheKey`] from `(build_id, computation_id, args, refresh_salt)`.
#[derive(Debug, Clone)]
pub struct CacheKeyBuilder<'a> {
    build_id: &'a str,
    computation_id: &'a str,
    bound: Vec<CacheArg>,
    args: Vec<CacheArg>,
    refresh_salt: Option<&'a str>,
    fallback: FallbackParams,
}

impl<'a> CacheKeyBuilder<'a> {
    pub fn new(build_id: &'a str, computation_id: &'a str) -> Self {
        Self {
            build_id,
            computation_id,
            bound: Vec::new(),
            args: Vec::new(),
            refresh_salt: None,
            fallback: FallbackParams::Reject,
        }
    }

    /// Implicitly bound leading arguments (closure captures).
    pub fn bound(mut self, bound: Vec<CacheArg>) -> Self {
        self.bound = bound;
        self
    }

    pub fn args(mut self, args: Vec<CacheArg>) -> Self {
        self.args = args;
        self
    }

    /// Development-only salt; presence alone changes the key.
    pub fn refresh_salt(mut self, salt: Option<&'a str>) -> Self {
        self.refresh_salt = salt;
        self
    }

    pub fn fallback_params(mut self, policy: FallbackParams) -> Self {
        self.fallback = policy;
        self
    }

    /// Serializes the inputs without hashing them.
    pub fn encode(&self) -> Result<Vec<u8>, KeyError> {
        let mut out = Vec::with_capacity(64);
        write_str(&mut out, self.build_id);
        write_str(&mut out, self.computation_id);

        if self.bound.is_empty() {
            write_list(&mut out, &self.args, self.fallback)?;
        } else {
            out.push(TAG_BOUND);
            write_list(&mut out, &self.bound, self.fallback)?;
            write_list(&mut out, &self.args, self.fallback)?;
        }

        match self.refresh_salt {
            Some(salt) => {
                out.push(1);
                write_str(&mut out, salt);
            }
            None => out.push(0),
        }
        Ok(out)
    }

    pub fn build(&self) -> Result<CacheKey, KeyError> {
        let encoded = self.encode()?;
        Ok(CacheKey(hex::encode(Sha256::digest(&encoded))))
    }
}

/// Shorthand for [`CacheKeyBuilder`] with every input given at once.
pub fn build(
    build_id: &str,
    computation_id: &str,
    args: Vec<CacheArg>,
    refresh_salt: Option<&str>,
) -> Result<CacheKey, KeyError> {
    CacheKeyBuilder::new(build_id, computation_id)
        .args(args)
        .refresh_salt(refresh_salt)
        .build()
}

const TAG_NULL: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_INT: u8 = 2;
const TAG_UINT: u8 = 3;
const TAG_FLOAT: u8 = 4;
const TAG_STR: u8 = 5;
const TAG_BYTES: u8 = 6;
const TAG_LIST: u8 = 7;
const TAG_MAP: u8 = 8;
const TAG_PARAM: u8 = 9;
/// Never an argument tag: keeps `(bound, args)` apart from any argument list.
const TAG_BOUND: u8 = 10;

fn write_len(out: &mut Vec<u8>, len: usize) {
    out.extend_from_slice(&(len as u64).to_le_bytes());
}

fn write_str(out: &mut Vec<u8>, s: &str) {
    write_len(out, s.len());
    out.extend_from_slice(s.as_bytes());
}

fn write_list(out: &mut Vec<u8>, items: &[CacheArg], policy: FallbackParams) -> Result<(), KeyError> {
    out.push(TAG_LIST);
    write_len(out, items.len());
    for item in items {
        write_arg(out, item, policy)?;
    }
    Ok(())
}

fn write_arg(out: &mut Vec<u8>, arg: &CacheArg, policy: FallbackParams) -> Result<(), KeyError> {
    match arg {
        CacheArg::Null => out.push(TAG_NULL),
        CacheArg::Bool(v) => {
            out.push(TAG_BOOL);
            out.push(u8::from(*v));
        }
        CacheArg::Int(v) => {
            out.push(TAG_INT);
            out.extend_from_slice(&v.to_le_bytes());
        }
        CacheArg::UInt(v) => {
            out.push(TAG_UINT);
            out.extend_from_slice(&v.to_le_bytes());
        }
        CacheArg::Float(v) => {
            out.push(TAG_FLOAT);
            out.extend_from_slice(&v.to_bits().to_le_bytes());
        }
        CacheArg::Str(v) => {
            out.push(TAG_STR);
            write_str(out, v);
        }
        CacheArg::Bytes(v) => {
            out.push(TAG_BYTES);
            write_len(out, v.len());
            out.extend_from_slice(v);
        }
        CacheArg::List(items) => write_list(out, items, policy)?,
        CacheArg::Map(map) => {
            out.push(TAG_MAP);
            write_len(out, map.len());
            for (k, v) in map {
                write_str(out, k);
                write_arg(out, v, policy)?;
            }
        }
        CacheArg::Param(param) => {
            out.push(TAG_PARAM);
            write_str(out, param.name());
            match param.raw() {
                ParamValue::Known(value) => {
                    out.push(1);
                    write_str(out, value);
                }
                ParamValue::Fallback => match policy {
                    FallbackParams::Reject => {
                        return Err(KeyError::DynamicAccess {
                            param: param.name().to_string(),
                        })
                    }
                    FallbackParams::EncodeByName => out.push(0),
                },
            }
        }
    }
    Ok(())
}
