use super::helpers::temp_store;
use crate::*;
use anyhow::Result;

// --------------------- update: commit / abort ---------------------

#[test]
fn update_commits_on_ok() -> Result<()> {
    let (_dir, store) = temp_store();

    store.update(|w| {
        w.put(b"d1", b"v1")?;
        w.put(b"d2", b"v2")
    })?;

    assert_eq!(store.get(b"d1")?, Some(b"v1".to_vec()));
    assert_eq!(store.get(b"d2")?, Some(b"v2".to_vec()));
    assert_eq!(store.len()?, 2);
    Ok(())
}

#[test]
fn update_aborts_on_err() -> Result<()> {
    let (_dir, store) = temp_store();
    store.update(|w| w.put(b"keep", b"1"))?;

    let res: Result<()> = store.update(|w| {
        w.put(b"lost", b"2")?;
        w.put(b"keep", b"overwritten")?;
        anyhow::bail!("boom")
    });

    assert!(res.is_err());
    assert!(store.get(b"lost")?.is_none());
    assert_eq!(store.get(b"keep")?, Some(b"1".to_vec()));
    Ok(())
}

#[test]
fn update_returns_closure_value() -> Result<()> {
    let (_dir, store) = temp_store();
    let puts = store.update(|w| {
        w.put(b"a", b"1")?;
        w.put(b"b", b"2")?;
        Ok(w.puts())
    })?;
    assert_eq!(puts, 2);
    Ok(())
}

#[test]
fn writer_sees_its_own_uncommitted_writes() -> Result<()> {
    let (_dir, store) = temp_store();
    store.update(|w| {
        assert!(w.get(b"k")?.is_none());
        w.put(b"k", b"v")?;
        assert_eq!(w.get(b"k")?, Some(b"v".to_vec()));
        Ok(())
    })
}

#[test]
fn empty_key_is_rejected() {
    let (_dir, store) = temp_store();
    let res = store.update(|w| w.put(b"", b"v"));
    assert!(res.is_err());
}

#[test]
fn update_error_is_the_closures_own() -> Result<()> {
    let (_dir, store) = temp_store();
    store.update(|w| w.put(b"k", b"v1"))?;

    let err = store
        .update(|w| -> Result<()> {
            w.put(b"k", b"v2")?;
            anyhow::bail!("merge rejected record")
        })
        .unwrap_err();
    assert_eq!(err.to_string(), "merge rejected record");
    assert_eq!(err.chain().count(), 1);
    assert_eq!(store.get(b"k")?, Some(b"v1".to_vec()));
    Ok(())
}

// --------------------- open modes ---------------------

#[test]
fn create_is_idempotent_and_keeps_data() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("db.redb");

    {
        let store = Store::create(&path)?;
        store.update(|w| w.put(b"d", b"v"))?;
    }

    let store = Store::create(&path)?;
    assert_eq!(store.get(b"d")?, Some(b"v".to_vec()));
    Ok(())
}

#[test]
fn read_only_open_sees_committed_data() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("db.redb");

    {
        let store = Store::create(&path)?;
        store.update(|w| w.put(b"d", b"v"))?;
    }

    let ro = Store::open_read_only(&path)?;
    assert_eq!(ro.get(b"d")?, Some(b"v".to_vec()));
    assert!(ro.get(b"missing")?.is_none());
    assert_eq!(ro.len()?, 1);
    assert_eq!(ro.path(), path.as_path());
    Ok(())
}

#[test]
fn read_only_open_of_missing_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    let err = Store::open_read_only(dir.path().join("nope.redb")).unwrap_err();
    assert!(err.to_string().contains("does not exist"));
}

#[test]
fn zero_batch_size_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let res = Store::create_with(
        dir.path().join("db.redb"),
        BatchOptions {
            max_batch_size: 0,
            ..BatchOptions::default()
        },
    );
    assert!(res.is_err());
}
