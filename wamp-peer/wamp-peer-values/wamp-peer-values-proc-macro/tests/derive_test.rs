use pretty_assertions::assert_eq;
use wamp_peer_values::{
    FromVariant,
    IntoVariant,
    Object,
    PathSegment,
    Variant,
    VariantList,
    VariantObject,
};

#[derive(Debug, PartialEq, VariantList)]
struct Point {
    x: i64,
    y: i64,
    #[wamp_peer_values(default, skip_serializing_if = Option::is_none)]
    label: Option<String>,
}

#[derive(Debug, PartialEq, VariantObject)]
struct Features {
    call_canceling: bool,
    #[wamp_peer_values(rename = "x_custom", default)]
    custom: bool,
    #[wamp_peer_values(default, skip_serializing_if = Vec::is_empty)]
    tags: Vec<String>,
}

#[derive(Debug, PartialEq, VariantList)]
struct Pair(String, u32);

#[test]
fn serializes_list_and_stops_at_skipped_field() {
    let point = Point {
        x: 1,
        y: -2,
        label: None,
    };
    assert_eq!(
        point.into_variant(),
        Ok(Variant::from(vec![Variant::Int(1), Variant::Int(-2)]))
    );
}

#[test]
fn deserializes_list_with_missing_default() {
    let value = Variant::from(vec![Variant::Int(3), Variant::UInt(4)]);
    assert_eq!(
        Point::from_variant(value),
        Ok(Point {
            x: 3,
            y: 4,
            label: None,
        })
    );
}

#[test]
fn reports_missing_required_list_member() {
    let value = Variant::from(vec![Variant::Int(3)]);
    assert_matches::assert_matches!(Point::from_variant(value), Err(err) => {
        assert_eq!(err.path(), &[PathSegment::Index(1)]);
        assert!(err.to_string().contains("y is missing from Point"));
    });
}

#[test]
fn reports_bad_list_member_type() {
    let value = Variant::from(vec![Variant::from("a"), Variant::from("b")]);
    assert_matches::assert_matches!(Pair::from_variant(value), Err(err) => {
        assert_eq!(err.path(), &[PathSegment::Index(1)]);
    });
}

#[test]
fn serializes_object_with_renames() {
    let features = Features {
        call_canceling: true,
        custom: false,
        tags: Vec::new(),
    };
    assert_eq!(
        features.into_variant(),
        Ok(Variant::Object(Object::from_iter([
            ("call_canceling".to_owned(), Variant::Bool(true)),
            ("x_custom".to_owned(), Variant::Bool(false)),
        ])))
    );
}

#[test]
fn deserializes_object_with_defaults() {
    let value = Variant::Object(Object::from_iter([(
        "call_canceling".to_owned(),
        Variant::Bool(false),
    )]));
    assert_eq!(
        Features::from_variant(value),
        Ok(Features {
            call_canceling: false,
            custom: false,
            tags: Vec::new(),
        })
    );
}

#[test]
fn reports_bad_object_member_key() {
    let value = Variant::Object(Object::from_iter([(
        "call_canceling".to_owned(),
        Variant::Int(1),
    )]));
    assert_matches::assert_matches!(Features::from_variant(value), Err(err) => {
        assert_eq!(err.path(), &[PathSegment::Key("call_canceling".to_owned())]);
    });
}
