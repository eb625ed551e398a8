use crate::{DynamicValue, ObjectValue};
use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use smol_str::SmolStr;
use sqlx::{
    decode::Decode,
    error::Error as SqlxError,
    mysql::{MySql, MySqlRow, MySqlValueRef},
    Column, FromRow, Row, TypeInfo, Value, ValueRef,
};
use std::convert::TryFrom;
use std::{collections::BTreeMap, io};

impl<'a> TryFrom<MySqlValueRef<'a>> for DynamicValue {
    type Error = anyhow::Error;

    fn try_from(vr: MySqlValueRef<'a>) -> Result<Self, Self::Error> {
        if vr.is_null() {
            return Ok(DynamicValue::none());
        }

        let owned = ValueRef::to_owned(&vr);
        let tn = owned.as_ref().type_info().name().to_string();

        macro_rules! dec {
            ($t:ty) => {{
                <$t as Decode<'_, MySql>>::decode(owned.as_ref()).map_err(|e| {
                    anyhow!(
                        "decode {} as {} failed: {}",
                        tn,
                        std::any::type_name::<$t>(),
                        e
                    )
                })
            }};
        }

        match tn.as_str() {
            "BIGINT" => Ok(DynamicValue::from(dec!(i64)?)),
            "INT" | "MEDIUMINT" => Ok(DynamicValue::from(dec!(i32)? as i64)),
            "SMALLINT" => Ok(DynamicValue::from(dec!(i16)? as i64)),
            "TINYINT" => Ok(DynamicValue::from(dec!(i8)? as i64)),
            "BIGINT UNSIGNED" => Ok(DynamicValue::from(dec!(u64)?)),
            "INT UNSIGNED" | "MEDIUMINT UNSIGNED" => Ok(DynamicValue::from(dec!(u32)? as u64)),
            "SMALLINT UNSIGNED" => Ok(DynamicValue::from(dec!(u16)? as u64)),
            "TINYINT UNSIGNED" => Ok(DynamicValue::from(dec!(u8)? as u64)),
            "DOUBLE" => Ok(DynamicValue::from(dec!(f64)?)),
            "FLOAT" => Ok(DynamicValue::from(dec!(f32)? as f64)),
            "BOOLEAN" => Ok(DynamicValue::from(dec!(bool)?)),

            "BLOB" | "LONGBLOB" | "MEDIUMBLOB" | "TINYBLOB" | "BINARY" | "VARBINARY" => {
                Ok(DynamicValue::from(dec!(Vec<u8>)?))
            }
            "VARCHAR" | "TEXT" | "LONGTEXT" | "MEDIUMTEXT" | "TINYTEXT" | "CHAR" | "ENUM"
            | "SET" | "JSON" => Ok(DynamicValue::from(dec!(String)?)),

            "DATE" => {
                let d: NaiveDate = dec!(NaiveDate)?;
                Ok(DynamicValue::from(d.format("%Y-%m-%d").to_string()))
            }
            "DATETIME" => {
                let dt: NaiveDateTime = dec!(NaiveDateTime)?;
                Ok(DynamicValue::from(
                    dt.and_utc().to_rfc3339_opts(SecondsFormat::AutoSi, true),
                ))
            }
            "TIMESTAMP" => {
                let dt: DateTime<Utc> = dec!(DateTime<Utc>)?;
                Ok(DynamicValue::from(dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)))
            }
            "TIME" => {
                // decode MySQL TIME binary payload, emit ISO-8601 duration
                let raw: Vec<u8> = dec!(Vec<u8>)?;
                Ok(DynamicValue::from(mysql_time_bin_to_iso8601(&raw)?))
            }
            "YEAR" => Ok(DynamicValue::from(dec!(u16)? as u64)),

            // DECIMAL travels as text on both protocols; keep it exact
            "DECIMAL" => Ok(DynamicValue::from(dec!(String)?)),

            "BIT" => Ok(DynamicValue::from(bit_to_u64(&dec!(Vec<u8>)?)?)),

            // GEOMETRY and friends: keep the raw payload rather than fail the
            // whole row, text when it happens to be UTF-8
            _ => Ok(raw_payload(dec!(Vec<u8>)?)),
        }
    }
}

impl TryFrom<&MySqlRow> for ObjectValue {
    type Error = anyhow::Error;
    fn try_from(row: &MySqlRow) -> Result<Self, Self::Error> {
        let mut map = BTreeMap::new();
        for col in row.columns() {
            let name = col.name();
            let dv = row
                .try_get_raw(name)
                .map_err(|e| anyhow!("error accessing column {name}: {e}"))
                .and_then(DynamicValue::try_from)?;
            map.insert(SmolStr::new(name), dv);
        }
        Ok(ObjectValue::with_map(map))
    }
}

impl<'r> FromRow<'r, MySqlRow> for ObjectValue {
    fn from_row(row: &'r MySqlRow) -> Result<Self, SqlxError> {
        let mut map = BTreeMap::new();
        for col in row.columns() {
            let name = col.name();
            let raw = row.try_get_raw(name)?;
            let dv = DynamicValue::try_from(raw).map_err(|e| SqlxError::ColumnDecode {
                index: name.into(),
                source: Box::new(io::Error::other(e.to_string())),
            })?;
            map.insert(SmolStr::new(name), dv);
        }
        Ok(ObjectValue::with_map(map))
    }
}

/// BIT(n) payload, big-endian, at most 8 bytes.
pub(crate) fn bit_to_u64(buf: &[u8]) -> Result<u64> {
    if buf.len() > 8 {
        bail!("BIT payload of {} bytes does not fit in 64 bits", buf.len());
    }
    Ok(buf.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
}

pub(crate) fn raw_payload(buf: Vec<u8>) -> DynamicValue {
    match String::from_utf8(buf) {
        Ok(text) => DynamicValue::from(text),
        Err(e) => DynamicValue::from(e.into_bytes()),
    }
}

/// TIME binary payload to an ISO 8601 duration (`PT26H3M4.5S`).
pub(crate) fn mysql_time_bin_to_iso8601(buf: &[u8]) -> Result<String> {
    if buf.is_empty() {
        bail!("empty TIME payload");
    }
    let len = buf[0] as usize;
    if len == 0 {
        return Ok("PT0S".to_string());
    }
    if buf.len() != 1 + len || !(len == 8 || len == 12) {
        bail!("unexpected TIME payload length: {}", buf.len());
    }

    let is_neg = buf[1] != 0;
    let days = u32::from_le_bytes([buf[2], buf[3], buf[4], buf[5]]);
    let hour = buf[6] as u64;
    let minute = buf[7] as u64;
    let second = buf[8] as u64;
    let micros = if len == 12 {
        u32::from_le_bytes([buf[9], buf[10], buf[11], buf[12]])
    } else {
        0
    };

    let total_hours = hour + (days as u64) * 24;

    use std::fmt::Write;
    let mut out = String::new();
    if is_neg {
        out.push('-');
    }
    out.push_str("PT");
    if total_hours > 0 {
        let _ = write!(out, "{total_hours}H");
    }
    if minute > 0 || total_hours > 0 {
        let _ = write!(out, "{minute}M");
    }
    if micros > 0 {
        let mut frac = format!("{micros:06}");
        while frac.ends_with('0') {
            frac.pop();
        }
        let _ = write!(out, "{second}.{frac}S");
    } else {
        let _ = write!(out, "{second}S");
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_payloads_render_as_durations() -> anyhow::Result<()> {
        assert_eq!(mysql_time_bin_to_iso8601(&[0])?, "PT0S");
        // 1 day, 2h 3m 4s
        let buf = [8, 0, 1, 0, 0, 0, 2, 3, 4];
        assert_eq!(mysql_time_bin_to_iso8601(&buf)?, "PT26H3M4S");
        // negative, 0h 0m 5.5s
        let buf = [12, 1, 0, 0, 0, 0, 0, 0, 5, 0x20, 0xA1, 0x07, 0x00];
        assert_eq!(mysql_time_bin_to_iso8601(&buf)?, "-PT5.5S");
        Ok(())
    }

    #[test]
    fn bit_payloads_are_numbers() -> anyhow::Result<()> {
        assert_eq!(bit_to_u64(&[0x01])?, 1);
        assert_eq!(bit_to_u64(&[0x01, 0x00])?, 256);
        assert_eq!(bit_to_u64(&[])?, 0);
        assert!(bit_to_u64(&[0; 9]).is_err());
        Ok(())
    }

    #[test]
    fn unlisted_types_keep_their_payload() {
        assert_eq!(raw_payload(b"POINT(1 2)".to_vec()), DynamicValue::from("POINT(1 2)"));
        let wkb = raw_payload(vec![0x00, 0xff, 0xfe]);
        assert_eq!(wkb.kind(), crate::value::ValueKind::Bytes);
        assert_eq!(wkb.as_str(), None);
    }

    #[test]
    fn malformed_time_payloads_fail() {
        assert!(mysql_time_bin_to_iso8601(&[]).is_err());
        assert!(mysql_time_bin_to_iso8601(&[8, 0, 1]).is_err());
    }
}
