//! Unit tests for `AppError` display format and busy detection.

use overlay_broker::AppError;

#[test]
fn display_prefixes_match_variant() {
    let cases = [
        (AppError::Config("bad".into()), "config: bad"),
        (AppError::Db("bad".into()), "db: bad"),
        (AppError::Io("bad".into()), "io: bad"),
        (AppError::Ipc("bad".into()), "ipc: bad"),
        (AppError::NotFound("bad".into()), "not found: bad"),
        (AppError::MountUnavailable("bad".into()), "mount unavailable: bad"),
        (
            AppError::MountVerificationFailed("bad".into()),
            "mount verification failed: bad",
        ),
        (AppError::StoreBusy("bad".into()), "store busy: bad"),
        (AppError::Tracking("bad".into()), "tracking: bad"),
        (AppError::InvalidSessionId("bad".into()), "invalid session id: bad"),
    ];
    for (err, expected) in cases {
        assert_eq!(err.to_string(), expected);
    }
}

#[test]
fn messages_have_no_trailing_period() {
    let err = AppError::MountUnavailable("overlay program not found on PATH".into());
    assert!(!err.to_string().ends_with('.'));
}

#[test]
fn locked_database_is_busy() {
    let locked = "error returned from database: (code: 5) database is locked";
    assert!(AppError::Db(locked.into()).is_busy());
    assert!(AppError::Db("SQLITE_BUSY".into()).is_busy());
    assert!(AppError::StoreBusy("locked after 5 attempts".into()).is_busy());
}

#[test]
fn other_errors_are_not_busy() {
    assert!(!AppError::Db("no such table: kv_store".into()).is_busy());
    assert!(!AppError::Io("database is locked".into()).is_busy());
}

#[test]
fn io_error_converts() {
    let err: AppError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
    assert!(matches!(err, AppError::Io(_)));
    assert!(err.to_string().contains("gone"));
}

#[test]
fn implements_std_error() {
    fn assert_error<E: std::error::Error>(_: &E) {}
    assert_error(&AppError::Tracking("x".into()));
}
