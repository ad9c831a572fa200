use outliner_core::{BulletContent, BulletRecord, BulletType};

#[test]
fn textual_content_serializes_with_type_tag() {
    let json = serde_json::to_value(BulletContent::text("groceries")).unwrap();
    assert_eq!(json["type"], "textual");
    assert_eq!(json["text"], "groceries");

    let decoded: BulletContent = serde_json::from_value(json).unwrap();
    assert_eq!(decoded, BulletContent::text("groceries"));
}

#[test]
fn mirror_content_serializes_referee() {
    let json = serde_json::to_value(BulletContent::mirror(42)).unwrap();
    assert_eq!(json["type"], "mirror");
    assert_eq!(json["referee"], 42);
}

#[test]
fn bullet_type_serializes_in_snake_case() {
    assert_eq!(
        serde_json::to_value(BulletType::Mirror).unwrap(),
        serde_json::json!("mirror")
    );
}

#[test]
fn empty_record_is_unparented_textual() {
    let record = BulletRecord::empty(7);

    assert_eq!(record.pbid, 7);
    assert_eq!(record.parent_pbid, None);
    assert_eq!(record.content, BulletContent::text(""));
    assert!(record.children.is_empty());
    assert_eq!(record.created_at, record.updated_at);
}
