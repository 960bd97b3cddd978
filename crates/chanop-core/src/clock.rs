use time::OffsetDateTime;

/// Current wall-clock time truncated to whole seconds.
///
/// Condition timestamps are compared for ordering and equality, so sub-second
/// noise would make otherwise identical status writes look different.
pub fn now_truncated() -> OffsetDateTime {
    let now = OffsetDateTime::now_utc();
    now.replace_nanosecond(0).unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_truncated_has_no_subsecond_part() {
        let now = now_truncated();
        assert_eq!(now.nanosecond(), 0);
    }
}
