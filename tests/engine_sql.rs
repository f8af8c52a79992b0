//! End-to-end SQL tests over a single database instance.

use tempfile::TempDir;

use shaledb::{Database, EngineError};

fn create_db(dir: &TempDir) -> Database {
    Database::create_with_cache(dir.path().join("db"), 64).unwrap()
}

fn exec(session: &shaledb::Session, sql: &str) -> String {
    match session.execute_str(sql) {
        Ok(reply) => reply,
        Err(e) => panic!("statement failed: {sql}\nerror: {e:#}"),
    }
}

#[test]
fn create_insert_select_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let db = create_db(&dir);
    let s = db.session();

    assert_eq!(
        exec(&s, "create table t id int32, name string (index id)"),
        "create t"
    );
    assert_eq!(exec(&s, "begin"), "begin");
    assert_eq!(exec(&s, "insert into t values 1 alice"), "insert");
    assert_eq!(exec(&s, "insert into t values 2 bob"), "insert");
    assert_eq!(exec(&s, "commit"), "commit");

    assert_eq!(exec(&s, "select * from t where id = 1"), "[1, alice]\n");
    assert_eq!(
        exec(&s, "select * from t where id > 0"),
        "[1, alice]\n[2, bob]\n"
    );
    db.close();
}

#[test]
fn select_projects_named_fields() {
    let dir = tempfile::tempdir().unwrap();
    let db = create_db(&dir);
    let s = db.session();

    exec(&s, "create table t id int32, name string (index id)");
    exec(&s, "insert into t values 7 carol");

    assert_eq!(exec(&s, "select name from t where id = 7"), "[carol]\n");
    assert_eq!(
        exec(&s, "select name, id from t where id = 7"),
        "[carol, 7]\n"
    );
    db.close();
}

#[test]
fn where_ranges_and_logic_ops() {
    let dir = tempfile::tempdir().unwrap();
    let db = create_db(&dir);
    let s = db.session();

    exec(&s, "create table t id int32, name string (index id)");
    for i in 1..=9 {
        exec(&s, &format!("insert into t values {i} row{i}"));
    }

    assert_eq!(
        exec(&s, "select * from t where id < 3"),
        "[1, row1]\n[2, row2]\n"
    );
    assert_eq!(exec(&s, "select * from t where id > 8"), "[9, row9]\n");
    assert_eq!(
        exec(&s, "select * from t where id > 3 and id < 6"),
        "[4, row4]\n[5, row5]\n"
    );
    assert_eq!(
        exec(&s, "select * from t where id = 1 or id = 9"),
        "[1, row1]\n[9, row9]\n"
    );
    db.close();
}

#[test]
fn update_rewrites_rows_and_keeps_them_queryable() {
    let dir = tempfile::tempdir().unwrap();
    let db = create_db(&dir);
    let s = db.session();

    exec(&s, "create table t id int32, name string (index id)");
    exec(&s, "insert into t values 1 alice");
    exec(&s, "insert into t values 2 bob");

    assert_eq!(exec(&s, "update t set name = carol where id = 1"), "update 1");
    assert_eq!(exec(&s, "select * from t where id = 1"), "[1, carol]\n");
    assert_eq!(exec(&s, "select * from t where id = 2"), "[2, bob]\n");
    db.close();
}

#[test]
fn delete_counts_and_removes_rows() {
    let dir = tempfile::tempdir().unwrap();
    let db = create_db(&dir);
    let s = db.session();

    exec(&s, "create table t id int32, name string (index id)");
    for i in 1..=5 {
        exec(&s, &format!("insert into t values {i} x{i}"));
    }

    assert_eq!(exec(&s, "delete from t where id < 3"), "delete 2");
    assert_eq!(
        exec(&s, "select * from t where id > 0"),
        "[3, x3]\n[4, x4]\n[5, x5]\n"
    );
    assert_eq!(exec(&s, "delete from t where id = 99"), "delete 0");
    db.close();
}

#[test]
fn string_index_supports_equality_lookup() {
    let dir = tempfile::tempdir().unwrap();
    let db = create_db(&dir);
    let s = db.session();

    exec(&s, "create table t id int32, name string (index id name)");
    exec(&s, "insert into t values 1 alice");
    exec(&s, "insert into t values 2 bob");

    assert_eq!(exec(&s, "select * from t where name = bob"), "[2, bob]\n");
    db.close();
}

#[test]
fn show_lists_tables_with_field_details() {
    let dir = tempfile::tempdir().unwrap();
    let db = create_db(&dir);
    let s = db.session();

    exec(&s, "create table t id int32, name string (index id)");
    let listing = exec(&s, "show");
    assert_eq!(
        listing,
        "{t: (id, int32, Index), (name, string, NoIndex)}\n"
    );
    db.close();
}

#[test]
fn repeatable_read_snapshot_isolation() {
    let dir = tempfile::tempdir().unwrap();
    let db = create_db(&dir);

    let setup = db.session();
    exec(&setup, "create table t id int32, name string (index id)");
    exec(&setup, "insert into t values 1 alice");

    let t1 = db.session();
    exec(&t1, "begin isolation level repeatable read");
    assert_eq!(exec(&t1, "select * from t where id = 1"), "[1, alice]\n");

    let t2 = db.session();
    exec(&t2, "begin");
    assert_eq!(exec(&t2, "update t set name = carol where id = 1"), "update 1");
    exec(&t2, "commit");

    // T1's snapshot still sees the original row.
    assert_eq!(exec(&t1, "select * from t where id = 1"), "[1, alice]\n");
    exec(&t1, "commit");

    // A fresh transaction sees the update.
    assert_eq!(exec(&setup, "select * from t where id = 1"), "[1, carol]\n");
    db.close();
}

#[test]
fn read_committed_sees_commits_midway() {
    let dir = tempfile::tempdir().unwrap();
    let db = create_db(&dir);

    let setup = db.session();
    exec(&setup, "create table t id int32, name string (index id)");
    exec(&setup, "insert into t values 1 alice");

    let t1 = db.session();
    exec(&t1, "begin");
    assert_eq!(exec(&t1, "select * from t where id = 1"), "[1, alice]\n");

    let t2 = db.session();
    exec(&t2, "begin");
    exec(&t2, "update t set name = carol where id = 1");
    exec(&t2, "commit");

    assert_eq!(exec(&t1, "select * from t where id = 1"), "[1, carol]\n");
    exec(&t1, "commit");
    db.close();
}

#[test]
fn version_skip_under_repeatable_read_aborts_writer() {
    let dir = tempfile::tempdir().unwrap();
    let db = create_db(&dir);

    let setup = db.session();
    exec(&setup, "create table t id int32, name string (index id)");
    exec(&setup, "insert into t values 1 alice");

    let t1 = db.session();
    exec(&t1, "begin isolation level repeatable read");
    assert_eq!(exec(&t1, "select * from t where id = 1"), "[1, alice]\n");

    let t2 = db.session();
    exec(&t2, "begin");
    exec(&t2, "update t set name = carol where id = 1");
    exec(&t2, "commit");

    let err = t1
        .execute("update t set name = dave where id = 1")
        .unwrap_err();
    assert_eq!(EngineError::of(&err), Some(EngineError::ConcurrentUpdate));

    // The transaction is poisoned; committing surfaces the same conflict.
    let err = t1.execute("commit").unwrap_err();
    assert_eq!(EngineError::of(&err), Some(EngineError::ConcurrentUpdate));

    // The committed update survives untouched.
    assert_eq!(exec(&setup, "select * from t where id = 1"), "[1, carol]\n");
    db.close();
}

#[test]
fn transaction_control_errors() {
    let dir = tempfile::tempdir().unwrap();
    let db = create_db(&dir);
    let s = db.session();

    let err = s.execute("commit").unwrap_err();
    assert_eq!(EngineError::of(&err), Some(EngineError::NoTransaction));
    let err = s.execute("abort").unwrap_err();
    assert_eq!(EngineError::of(&err), Some(EngineError::NoTransaction));

    exec(&s, "begin");
    let err = s.execute("begin").unwrap_err();
    assert_eq!(EngineError::of(&err), Some(EngineError::NestedTransaction));
    exec(&s, "abort");
    db.close();
}

#[test]
fn statement_errors_map_to_the_taxonomy() {
    let dir = tempfile::tempdir().unwrap();
    let db = create_db(&dir);
    let s = db.session();

    exec(&s, "create table t id int32, name string (index id)");

    let err = s.execute("select * from missing").unwrap_err();
    assert_eq!(EngineError::of(&err), Some(EngineError::TableNotFound));

    let err = s
        .execute("create table t id int32 (index id)")
        .unwrap_err();
    assert_eq!(EngineError::of(&err), Some(EngineError::DuplicatedTable));

    let err = s.execute("select * from t where name = bob").unwrap_err();
    assert_eq!(EngineError::of(&err), Some(EngineError::FieldNotIndexed));

    let err = s.execute("select * from t where ghost = 1").unwrap_err();
    assert_eq!(EngineError::of(&err), Some(EngineError::FieldNotFound));

    let err = s.execute("insert into t values 1").unwrap_err();
    assert_eq!(EngineError::of(&err), Some(EngineError::InvalidValues));

    let err = s.execute("insert into t values x y").unwrap_err();
    assert_eq!(EngineError::of(&err), Some(EngineError::InvalidValues));

    let err = s.execute("drop table t").unwrap_err();
    assert_eq!(EngineError::of(&err), Some(EngineError::InvalidCommand));

    // Failed implicit statements must not leave rows behind.
    assert_eq!(exec(&s, "select * from t where id > 0"), "");
    db.close();
}

#[test]
fn aborted_transaction_discards_its_writes() {
    let dir = tempfile::tempdir().unwrap();
    let db = create_db(&dir);
    let s = db.session();

    exec(&s, "create table t id int32, name string (index id)");
    exec(&s, "begin");
    exec(&s, "insert into t values 1 ghost");
    exec(&s, "abort");

    assert_eq!(exec(&s, "select * from t where id > 0"), "");
    db.close();
}

#[test]
fn rows_written_in_transaction_visible_to_itself() {
    let dir = tempfile::tempdir().unwrap();
    let db = create_db(&dir);
    let s = db.session();

    exec(&s, "create table t id int32, name string (index id)");
    exec(&s, "begin");
    exec(&s, "insert into t values 5 eve");
    assert_eq!(exec(&s, "select * from t where id = 5"), "[5, eve]\n");
    exec(&s, "update t set name = eva where id = 5");
    assert_eq!(exec(&s, "select * from t where id = 5"), "[5, eva]\n");
    exec(&s, "commit");
    db.close();
}

#[test]
fn int64_fields_round_trip_large_values() {
    let dir = tempfile::tempdir().unwrap();
    let db = create_db(&dir);
    let s = db.session();

    exec(&s, "create table big id int64, note string (index id)");
    exec(&s, "insert into big values 4294967296 over32bits");
    assert_eq!(
        exec(&s, "select * from big where id = 4294967296"),
        "[4294967296, over32bits]\n"
    );
    db.close();
}
