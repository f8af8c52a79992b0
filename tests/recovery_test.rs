//! Crash-recovery tests: databases dropped without a clean close must come
//! back with exactly the committed state.

use shaledb::Database;

fn exec(session: &shaledb::Session, sql: &str) -> String {
    match session.execute_str(sql) {
        Ok(reply) => reply,
        Err(e) => panic!("statement failed: {sql}\nerror: {e:#}"),
    }
}

#[test]
fn clean_close_and_reopen_preserves_rows() {
    let dir = tempfile::tempdir().unwrap();
    let prefix = dir.path().join("db");
    {
        let db = Database::create_with_cache(&prefix, 64).unwrap();
        let s = db.session();
        exec(&s, "create table t id int32, name string (index id)");
        exec(&s, "insert into t values 1 alice");
        exec(&s, "insert into t values 2 bob");
        drop(s);
        db.close();
    }
    let db = Database::open_with_cache(&prefix, 64).unwrap();
    let s = db.session();
    assert_eq!(
        exec(&s, "select * from t where id > 0"),
        "[1, alice]\n[2, bob]\n"
    );
    drop(s);
    db.close();
}

#[test]
fn crash_recovers_committed_and_discards_active_transactions() {
    let dir = tempfile::tempdir().unwrap();
    let prefix = dir.path().join("db");
    let committed = 8;
    let in_flight = 5;
    {
        let db = Database::create_with_cache(&prefix, 64).unwrap();
        let s = db.session();
        exec(&s, "create table t id int32, name string (index id)");

        exec(&s, "begin");
        for i in 1..=committed {
            exec(&s, &format!("insert into t values {i} keep{i}"));
        }
        exec(&s, "commit");

        let loser = db.session();
        exec(&loser, "begin");
        for i in 100..100 + in_flight {
            exec(&loser, &format!("insert into t values {i} lose{i}"));
        }
        // Crash: neither commit nor clean close. Forget the loser session so
        // its drop hook cannot politely abort the transaction.
        std::mem::forget(loser);
        drop(s);
        drop(db);
    }

    let db = Database::open_with_cache(&prefix, 64).unwrap();
    let s = db.session();
    let rows = exec(&s, "select * from t where id > 0");
    let expected: String = (1..=committed)
        .map(|i| format!("[{i}, keep{i}]\n"))
        .collect();
    assert_eq!(rows, expected);
    drop(s);
    db.close();
}

#[test]
fn recovered_database_accepts_new_writes() {
    let dir = tempfile::tempdir().unwrap();
    let prefix = dir.path().join("db");
    {
        let db = Database::create_with_cache(&prefix, 64).unwrap();
        let s = db.session();
        exec(&s, "create table t id int32, name string (index id)");
        exec(&s, "insert into t values 1 before");
        drop(s);
        drop(db); // crash
    }
    {
        let db = Database::open_with_cache(&prefix, 64).unwrap();
        let s = db.session();
        exec(&s, "insert into t values 2 after");
        assert_eq!(
            exec(&s, "select * from t where id > 0"),
            "[1, before]\n[2, after]\n"
        );
        drop(s);
        db.close();
    }
    // And a clean reopen still has everything.
    let db = Database::open_with_cache(&prefix, 64).unwrap();
    let s = db.session();
    assert_eq!(
        exec(&s, "select * from t where id > 0"),
        "[1, before]\n[2, after]\n"
    );
    drop(s);
    db.close();
}

#[test]
fn double_crash_recovery_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let prefix = dir.path().join("db");
    {
        let db = Database::create_with_cache(&prefix, 64).unwrap();
        let s = db.session();
        exec(&s, "create table t id int32, name string (index id)");
        exec(&s, "insert into t values 1 one");
        drop(s);
        drop(db); // crash 1
    }
    {
        // Recover, then crash again without writing anything.
        let db = Database::open_with_cache(&prefix, 64).unwrap();
        drop(db); // crash 2
    }
    let db = Database::open_with_cache(&prefix, 64).unwrap();
    let s = db.session();
    assert_eq!(exec(&s, "select * from t where id > 0"), "[1, one]\n");
    drop(s);
    db.close();
}

#[test]
fn updates_and_deletes_survive_crash() {
    let dir = tempfile::tempdir().unwrap();
    let prefix = dir.path().join("db");
    {
        let db = Database::create_with_cache(&prefix, 64).unwrap();
        let s = db.session();
        exec(&s, "create table t id int32, name string (index id)");
        for i in 1..=4 {
            exec(&s, &format!("insert into t values {i} v{i}"));
        }
        exec(&s, "update t set name = patched where id = 2");
        exec(&s, "delete from t where id = 3");
        drop(s);
        drop(db); // crash
    }
    let db = Database::open_with_cache(&prefix, 64).unwrap();
    let s = db.session();
    assert_eq!(
        exec(&s, "select * from t where id > 0"),
        "[1, v1]\n[2, patched]\n[4, v4]\n"
    );
    drop(s);
    db.close();
}
