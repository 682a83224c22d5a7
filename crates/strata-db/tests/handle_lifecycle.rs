//! The process-wide handle is global state, so its whole lifecycle is
//! exercised by a single test in its own binary.

use std::panic::{AssertUnwindSafe, catch_unwind};

use strata_common::Error;
use strata_config::DatabaseConfig;
use strata_db::log::Level;
use strata_db::{MemorySink, catalog};

#[test]
fn init_get_close_lifecycle() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = DatabaseConfig {
        driver: "sqlite3".to_string(),
        path: dir.path().join("strata.db").to_string_lossy().into_owned(),
        ledger_table: "schema_migrations".to_string(),
    };
    let registry = catalog::registry().expect("catalog registry");
    let sink = MemorySink::new();

    assert!(matches!(strata_db::get(), Err(Error::NotInitialized)));
    assert!(matches!(strata_db::close(), Err(Error::NotInitialized)));

    let db = strata_db::init(&config, &registry, &sink);
    let status = db.status(&registry).expect("status");
    assert!(status.is_up_to_date());

    // a second init hands back the same store without migrating again
    let again = strata_db::try_init(&config, &registry, &sink).expect("second init");
    assert!(std::sync::Arc::ptr_eq(&db, &again));
    let (again, startup) =
        strata_db::try_init_with_report(&config, &registry, &sink).expect("third init");
    assert!(std::sync::Arc::ptr_eq(&db, &again));
    assert!(startup.is_none());
    assert!(std::sync::Arc::ptr_eq(&db, &strata_db::get().expect("get")));

    strata_db::close().expect("close");
    assert!(db.is_closed());
    assert!(matches!(strata_db::get(), Err(Error::Closed)));
    assert!(matches!(
        strata_db::try_init(&config, &registry, &sink),
        Err(Error::Closed)
    ));
    strata_db::close().expect("closing twice is harmless");

    // init after close is fatal
    let fatal = catch_unwind(AssertUnwindSafe(|| {
        strata_db::init(&config, &registry, &sink);
    }));
    assert!(fatal.is_err());
    assert!(sink.contains(Level::Fatal, "database handle is closed"));
}
