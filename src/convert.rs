//! Assignment of driver-native values into user-supplied destinations.
//!
//! The policy is lossless-or-error: a conversion only succeeds when the
//! destination can represent the source exactly. Failures carry enough
//! text to identify both sides; the row cursor wraps them with the
//! offending column index.

use chrono::NaiveDateTime;

use crate::error::DbError;
use crate::value::{Value, Valuer};

/// A byte destination that takes the driver's row buffer without copying.
///
/// Scanning into `RawBytes` moves the blob out of the cursor's current
/// row instead of cloning it; the vacated column reads as NULL until the
/// next advance. Use a plain `Vec<u8>` destination to get an owned copy
/// instead. Single-row scans ([`crate::Row::scan`]) reject `RawBytes`
/// because the cursor is closed before the call returns.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RawBytes(pub Option<Vec<u8>>);

impl RawBytes {
    /// The held bytes, or `None` for a NULL column.
    #[must_use]
    pub fn as_slice(&self) -> Option<&[u8]> {
        self.0.as_deref()
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        self.0.is_none()
    }
}

/// Custom scan destinations implement `Scanner` to receive the
/// driver-native value directly.
pub trait Scanner {
    /// Store `src` into self, or fail if that would lose information.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Conversion` when the value cannot be stored
    /// losslessly.
    fn scan(&mut self, src: Value) -> Result<(), DbError>;
}

/// A scan destination: one variant per supported target shape.
///
/// The `Opt*` variants are the nullable counterparts; they are the only
/// scalar destinations that accept NULL.
pub enum ScanDest<'a> {
    Int(&'a mut i64),
    Float(&'a mut f64),
    Bool(&'a mut bool),
    Text(&'a mut String),
    /// Owned byte destination; always receives a copy.
    Bytes(&'a mut Vec<u8>),
    /// Borrow-view byte destination; takes the driver buffer.
    Raw(&'a mut RawBytes),
    Timestamp(&'a mut NaiveDateTime),
    OptInt(&'a mut Option<i64>),
    OptFloat(&'a mut Option<f64>),
    OptBool(&'a mut Option<bool>),
    OptText(&'a mut Option<String>),
    OptBytes(&'a mut Option<Vec<u8>>),
    OptTimestamp(&'a mut Option<NaiveDateTime>),
    /// Opaque destination: receives the driver-native value verbatim,
    /// with blob payloads defensively copied.
    Any(&'a mut Value),
    /// Delegate to a user-supplied [`Scanner`].
    Custom(&'a mut dyn Scanner),
}

impl ScanDest<'_> {
    /// Whether this destination aliases driver memory when scanned.
    #[must_use]
    pub fn is_borrow_view(&self) -> bool {
        matches!(self, ScanDest::Raw(_))
    }
}

/// Copy `src` into `dest` under the lossless-or-error policy.
///
/// `src` is mutable so borrow-view destinations can take the blob out of
/// the row buffer rather than copying it.
pub(crate) fn convert_assign(dest: &mut ScanDest<'_>, src: &mut Value) -> Result<(), DbError> {
    match dest {
        ScanDest::Int(d) => **d = to_int(src)?,
        ScanDest::Float(d) => **d = to_float(src)?,
        ScanDest::Bool(d) => **d = to_bool(src)?,
        ScanDest::Text(d) => **d = to_text(src)?,
        ScanDest::Timestamp(d) => **d = to_timestamp(src)?,
        ScanDest::Bytes(d) => match src {
            Value::Null => d.clear(),
            other => **d = to_bytes(other)?,
        },
        ScanDest::Raw(d) => **d = take_raw(src)?,
        ScanDest::OptInt(d) => **d = nullable(src, to_int)?,
        ScanDest::OptFloat(d) => **d = nullable(src, to_float)?,
        ScanDest::OptBool(d) => **d = nullable(src, to_bool)?,
        ScanDest::OptText(d) => **d = nullable(src, to_text)?,
        ScanDest::OptBytes(d) => **d = nullable(src, to_bytes)?,
        ScanDest::OptTimestamp(d) => **d = nullable(src, to_timestamp)?,
        // Blob payloads are cloned here, so the caller owns the memory.
        ScanDest::Any(d) => **d = src.clone(),
        ScanDest::Custom(scanner) => scanner.scan(src.clone())?,
    }
    Ok(())
}

fn nullable<T>(
    src: &Value,
    convert: impl Fn(&Value) -> Result<T, DbError>,
) -> Result<Option<T>, DbError> {
    match src {
        Value::Null => Ok(None),
        other => convert(other).map(Some),
    }
}

fn unsupported(src: &Value, dest: &str) -> DbError {
    DbError::Conversion(format!(
        "unsupported conversion from {} to {dest}",
        src.kind()
    ))
}

fn to_int(src: &Value) -> Result<i64, DbError> {
    match src {
        Value::Int(i) => Ok(*i),
        Value::Float(f) => {
            let i = *f as i64;
            if i as f64 == *f {
                Ok(i)
            } else {
                Err(DbError::Conversion(format!(
                    "float64 {f} does not round-trip through int64"
                )))
            }
        }
        Value::Text(s) => parse_int(s),
        Value::Blob(b) => parse_int(&utf8_text(b)?),
        other => Err(unsupported(other, "int64")),
    }
}

fn parse_int(s: &str) -> Result<i64, DbError> {
    s.parse::<i64>()
        .map_err(|e| DbError::Conversion(format!("parsing {s:?} as int64: {e}")))
}

fn to_float(src: &Value) -> Result<f64, DbError> {
    match src {
        Value::Float(f) => Ok(*f),
        Value::Int(i) => {
            let f = *i as f64;
            if f as i64 == *i {
                Ok(f)
            } else {
                Err(DbError::Conversion(format!(
                    "int64 {i} does not round-trip through float64"
                )))
            }
        }
        Value::Text(s) => parse_float(s),
        Value::Blob(b) => parse_float(&utf8_text(b)?),
        other => Err(unsupported(other, "float64")),
    }
}

fn parse_float(s: &str) -> Result<f64, DbError> {
    s.parse::<f64>()
        .map_err(|e| DbError::Conversion(format!("parsing {s:?} as float64: {e}")))
}

fn to_bool(src: &Value) -> Result<bool, DbError> {
    match src {
        Value::Bool(b) => Ok(*b),
        Value::Int(0) => Ok(false),
        Value::Int(1) => Ok(true),
        Value::Text(s) => parse_bool(s),
        Value::Blob(b) => parse_bool(&utf8_text(b)?),
        other => Err(unsupported(other, "bool")),
    }
}

fn parse_bool(s: &str) -> Result<bool, DbError> {
    match s {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Ok(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Ok(false),
        _ => Err(DbError::Conversion(format!("parsing {s:?} as bool"))),
    }
}

fn to_text(src: &Value) -> Result<String, DbError> {
    match src {
        Value::Text(s) => Ok(s.clone()),
        Value::Int(i) => Ok(i.to_string()),
        Value::Float(f) => Ok(f.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Timestamp(t) => Ok(t.format("%Y-%m-%d %H:%M:%S%.f").to_string()),
        Value::Blob(b) => utf8_text(b),
        Value::Null => Err(unsupported(src, "text")),
    }
}

fn to_bytes(src: &Value) -> Result<Vec<u8>, DbError> {
    match src {
        Value::Blob(b) => Ok(b.clone()),
        Value::Text(s) => Ok(s.clone().into_bytes()),
        other => Err(unsupported(other, "blob")),
    }
}

fn to_timestamp(src: &Value) -> Result<NaiveDateTime, DbError> {
    match src {
        Value::Timestamp(t) => Ok(*t),
        Value::Text(_) => src.as_timestamp().ok_or_else(|| {
            DbError::Conversion("parsing text as timestamp".to_string())
        }),
        other => Err(unsupported(other, "timestamp")),
    }
}

fn take_raw(src: &mut Value) -> Result<RawBytes, DbError> {
    match std::mem::replace(src, Value::Null) {
        Value::Null => Ok(RawBytes(None)),
        Value::Blob(b) => Ok(RawBytes(Some(b))),
        Value::Text(s) => Ok(RawBytes(Some(s.into_bytes()))),
        other => {
            let err = unsupported(&other, "raw bytes");
            *src = other;
            Err(err)
        }
    }
}

fn utf8_text(bytes: &[u8]) -> Result<String, DbError> {
    String::from_utf8(bytes.to_vec())
        .map_err(|_| DbError::Conversion("blob is not valid UTF-8".to_string()))
}

/// Normalize user arguments for the driver: arity-check against the
/// statement's reported placeholder count, then run every argument
/// through its [`Valuer`].
pub(crate) fn driver_args(
    num_input: Option<usize>,
    args: &[Value],
) -> Result<Vec<Value>, DbError> {
    if let Some(want) = num_input
        && want != args.len()
    {
        return Err(DbError::Parameter(format!(
            "expected {want} arguments, got {}",
            args.len()
        )));
    }
    args.iter().map(Valuer::value).collect()
}
