use outliner_core::db::open_db_in_memory;
use outliner_core::{
    BackingStore, BulletContent, SqliteBackingStore, StoreError, TransactionalBackingStore,
    ROOT_BULLET_PBID,
};
use rusqlite::Connection;

fn setup() -> Connection {
    open_db_in_memory().unwrap()
}

#[test]
fn insert_empty_bullet_allocates_unparented_textual_bullet() {
    let conn = setup();
    let store = SqliteBackingStore::try_new(&conn).unwrap();

    let pbid = store.insert_empty_bullet().unwrap();
    assert_ne!(pbid, ROOT_BULLET_PBID);

    let record = store.fetch_bullet(pbid).unwrap();
    assert_eq!(record.pbid, pbid);
    assert_eq!(record.parent_pbid, None);
    assert_eq!(record.content, BulletContent::text(""));
    assert!(record.children.is_empty());
    assert_eq!(store.fetch_parent_of_bullet(pbid).unwrap(), None);
}

#[test]
fn fetch_unknown_bullet_is_not_found() {
    let conn = setup();
    let store = SqliteBackingStore::try_new(&conn).unwrap();

    assert!(matches!(store.fetch_bullet(404), Err(StoreError::NotFound(404))));
    assert!(matches!(
        store.fetch_parent_of_bullet(404),
        Err(StoreError::NotFound(404))
    ));
    assert!(matches!(
        store.fetch_children_of_bullet(404),
        Err(StoreError::NotFound(404))
    ));
}

#[test]
fn content_roundtrips_for_both_variants() {
    let conn = setup();
    let store = SqliteBackingStore::try_new(&conn).unwrap();
    let textual = store.insert_empty_bullet().unwrap();
    let mirror = store.insert_empty_bullet().unwrap();

    store
        .set_bullet_content(textual, &BulletContent::text("buy milk"))
        .unwrap();
    store
        .set_bullet_content(mirror, &BulletContent::mirror(textual))
        .unwrap();

    assert_eq!(
        store.fetch_bullet(textual).unwrap().content,
        BulletContent::text("buy milk")
    );
    assert_eq!(
        store.fetch_bullet(mirror).unwrap().content,
        BulletContent::mirror(textual)
    );

    let tag: i64 = conn
        .query_row(
            "SELECT content_type FROM bullets WHERE pbid = ?1;",
            [mirror as i64],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(tag, 2);
}

#[test]
fn set_content_on_unknown_bullet_is_not_found() {
    let conn = setup();
    let store = SqliteBackingStore::try_new(&conn).unwrap();

    let err = store
        .set_bullet_content(404, &BulletContent::text("x"))
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound(404)));
}

#[test]
fn positioning_calls_establish_sibling_order() {
    let conn = setup();
    let store = SqliteBackingStore::try_new(&conn).unwrap();
    let a = store.insert_empty_bullet().unwrap();
    let b = store.insert_empty_bullet().unwrap();
    let c = store.insert_empty_bullet().unwrap();

    store.set_bullet_position_at_beginning(a, ROOT_BULLET_PBID).unwrap();
    store.set_bullet_position_after(c, ROOT_BULLET_PBID, a).unwrap();
    store.set_bullet_position_after(b, ROOT_BULLET_PBID, a).unwrap();
    assert_eq!(
        store.fetch_children_of_bullet(ROOT_BULLET_PBID).unwrap(),
        vec![a, b, c]
    );

    store.set_bullet_position_at_beginning(c, ROOT_BULLET_PBID).unwrap();
    assert_eq!(
        store.fetch_children_of_bullet(ROOT_BULLET_PBID).unwrap(),
        vec![c, a, b]
    );
    assert_eq!(store.fetch_parent_of_bullet(c).unwrap(), Some(ROOT_BULLET_PBID));
    assert_eq!(
        store.fetch_bullet(ROOT_BULLET_PBID).unwrap().children,
        vec![c, a, b]
    );
}

#[test]
fn moving_to_another_parent_removes_from_old_sibling_list() {
    let conn = setup();
    let store = SqliteBackingStore::try_new(&conn).unwrap();
    let a = store.insert_empty_bullet().unwrap();
    let b = store.insert_empty_bullet().unwrap();
    store.set_bullet_position_at_beginning(a, ROOT_BULLET_PBID).unwrap();
    store.set_bullet_position_after(b, ROOT_BULLET_PBID, a).unwrap();

    store.set_bullet_position_at_beginning(b, a).unwrap();

    assert_eq!(store.fetch_children_of_bullet(ROOT_BULLET_PBID).unwrap(), vec![a]);
    assert_eq!(store.fetch_children_of_bullet(a).unwrap(), vec![b]);
    assert_eq!(store.fetch_parent_of_bullet(b).unwrap(), Some(a));
}

#[test]
fn positioning_after_non_sibling_is_invalid_and_changes_nothing() {
    let conn = setup();
    let store = SqliteBackingStore::try_new(&conn).unwrap();
    let a = store.insert_empty_bullet().unwrap();
    let stray = store.insert_empty_bullet().unwrap();

    let err = store
        .set_bullet_position_after(a, ROOT_BULLET_PBID, stray)
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidOperation(_)));
    assert_eq!(store.fetch_parent_of_bullet(a).unwrap(), None);
    assert!(store
        .fetch_children_of_bullet(ROOT_BULLET_PBID)
        .unwrap()
        .is_empty());
}

#[test]
fn moving_under_own_descendant_is_invalid_and_changes_nothing() {
    let conn = setup();
    let store = SqliteBackingStore::try_new(&conn).unwrap();
    let a = store.insert_empty_bullet().unwrap();
    let b = store.insert_empty_bullet().unwrap();
    let c = store.insert_empty_bullet().unwrap();
    store.set_bullet_position_at_beginning(a, ROOT_BULLET_PBID).unwrap();
    store.set_bullet_position_at_beginning(b, a).unwrap();
    store.set_bullet_position_at_beginning(c, b).unwrap();

    assert!(matches!(
        store.set_bullet_position_at_beginning(a, b),
        Err(StoreError::InvalidOperation(_))
    ));
    assert!(matches!(
        store.set_bullet_position_after(a, b, c),
        Err(StoreError::InvalidOperation(_))
    ));
    assert_eq!(store.fetch_parent_of_bullet(a).unwrap(), Some(ROOT_BULLET_PBID));
    assert_eq!(store.fetch_children_of_bullet(b).unwrap(), vec![c]);

    // A dangling parent link ends the ancestor walk.
    store.delete_bullet(b).unwrap();
    store.set_bullet_position_at_beginning(a, c).unwrap();
    assert_eq!(store.fetch_parent_of_bullet(a).unwrap(), Some(c));
}

#[test]
fn root_cannot_be_deleted_or_moved() {
    let conn = setup();
    let store = SqliteBackingStore::try_new(&conn).unwrap();
    let a = store.insert_empty_bullet().unwrap();

    assert!(matches!(
        store.delete_bullet(ROOT_BULLET_PBID),
        Err(StoreError::InvalidOperation(_))
    ));
    assert!(matches!(
        store.set_bullet_position_at_beginning(ROOT_BULLET_PBID, a),
        Err(StoreError::InvalidOperation(_))
    ));
    assert!(store.fetch_bullet(ROOT_BULLET_PBID).is_ok());
}

#[test]
fn delete_does_not_cascade_to_children() {
    let conn = setup();
    let store = SqliteBackingStore::try_new(&conn).unwrap();
    let parent = store.insert_empty_bullet().unwrap();
    let child = store.insert_empty_bullet().unwrap();
    store.set_bullet_position_at_beginning(parent, ROOT_BULLET_PBID).unwrap();
    store.set_bullet_position_at_beginning(child, parent).unwrap();

    store.delete_bullet(parent).unwrap();

    assert!(matches!(store.fetch_bullet(parent), Err(StoreError::NotFound(_))));
    assert!(store
        .fetch_children_of_bullet(ROOT_BULLET_PBID)
        .unwrap()
        .is_empty());
    assert_eq!(store.fetch_parent_of_bullet(child).unwrap(), Some(parent));
    assert!(matches!(store.delete_bullet(parent), Err(StoreError::NotFound(_))));
}

#[test]
fn deleted_pbids_are_never_reallocated() {
    let conn = setup();
    let store = SqliteBackingStore::try_new(&conn).unwrap();
    let first = store.insert_empty_bullet().unwrap();
    store.delete_bullet(first).unwrap();

    let second = store.insert_empty_bullet().unwrap();
    assert!(second > first);
}

#[test]
fn rollback_discards_calls_made_inside_transaction() {
    let conn = setup();
    let store = SqliteBackingStore::try_new(&conn).unwrap();
    let kept = store.insert_empty_bullet().unwrap();

    store.begin_transaction().unwrap();
    assert!(store.in_transaction());
    let discarded = store.insert_empty_bullet().unwrap();
    store.set_bullet_position_at_beginning(kept, ROOT_BULLET_PBID).unwrap();
    store.rollback_transaction().unwrap();

    assert!(!store.in_transaction());
    assert!(matches!(
        store.fetch_bullet(discarded),
        Err(StoreError::NotFound(_))
    ));
    assert_eq!(store.fetch_parent_of_bullet(kept).unwrap(), None);
}

#[test]
fn commit_keeps_calls_made_inside_transaction() {
    let conn = setup();
    let store = SqliteBackingStore::try_new(&conn).unwrap();

    store.begin_transaction().unwrap();
    let a = store.insert_empty_bullet().unwrap();
    store.set_bullet_position_at_beginning(a, ROOT_BULLET_PBID).unwrap();
    store.commit_transaction().unwrap();

    assert_eq!(
        store.fetch_children_of_bullet(ROOT_BULLET_PBID).unwrap(),
        vec![a]
    );
}

#[test]
fn transaction_scoping_misuse_is_invalid() {
    let conn = setup();
    let store = SqliteBackingStore::try_new(&conn).unwrap();

    assert!(matches!(
        store.commit_transaction(),
        Err(StoreError::InvalidOperation(_))
    ));
    assert!(matches!(
        store.rollback_transaction(),
        Err(StoreError::InvalidOperation(_))
    ));

    store.begin_transaction().unwrap();
    assert!(matches!(
        store.begin_transaction(),
        Err(StoreError::InvalidOperation(_))
    ));
    store.rollback_transaction().unwrap();
}

#[test]
fn failed_reposition_inside_transaction_keeps_transaction_usable() {
    let conn = setup();
    let store = SqliteBackingStore::try_new(&conn).unwrap();
    let a = store.insert_empty_bullet().unwrap();

    store.begin_transaction().unwrap();
    store.set_bullet_position_at_beginning(a, ROOT_BULLET_PBID).unwrap();
    assert!(store.set_bullet_position_after(a, ROOT_BULLET_PBID, 404).is_err());
    assert!(store.in_transaction());
    store.commit_transaction().unwrap();

    assert_eq!(
        store.fetch_children_of_bullet(ROOT_BULLET_PBID).unwrap(),
        vec![a]
    );
}
