use time::{format_description::well_known::Rfc3339, OffsetDateTime, PrimitiveDateTime};

#[cfg(test)]
pub(crate) fn primitive_now_utc() -> PrimitiveDateTime {
    let now = OffsetDateTime::now_utc();
    PrimitiveDateTime::new(now.date(), now.time())
}

/// Converts engine milliseconds into the naive UTC timestamp stored in Postgres.
pub(crate) fn primitive_from_epoch_ms(value_ms: i64) -> PrimitiveDateTime {
    let nanos = i128::from(value_ms) * 1_000_000;
    let instant =
        OffsetDateTime::from_unix_timestamp_nanos(nanos).unwrap_or(OffsetDateTime::UNIX_EPOCH);
    PrimitiveDateTime::new(instant.date(), instant.time())
}

pub(crate) fn format_primitive(value: PrimitiveDateTime) -> String {
    value.assume_utc().format(&Rfc3339).unwrap_or_else(|_| value.assume_utc().to_string())
}
