//! Normalizer rules, idempotence, and field validation.

use serde_json::json;

use clinic_intake::draft::EntityDraft;
use clinic_intake::normalize::{
    normalize_str, normalize_value, validate_age, validate_draft, validate_phone,
};
use clinic_intake::schema::{FieldKind, FieldSchema};

#[test]
fn phone_round_trip_passes_validation() {
    let normalized = normalize_str(FieldKind::Phone, "555-123-4567");
    assert_eq!(normalized, "5551234567");
    assert!(validate_phone("telefono", &normalized, 10).is_ok());
}

#[test]
fn short_phone_fails_with_digit_count_message() {
    let normalized = normalize_str(FieldKind::Phone, "12345");
    let err = validate_phone("telefono", &normalized, 10).expect_err("5 digits must fail");
    assert_eq!(err.field, "telefono");
    assert_eq!(
        err.message,
        "El teléfono debe tener 10 dígitos (se recibieron 5)."
    );
}

#[test]
fn normalization_is_idempotent_for_every_kind() {
    let samples: &[(FieldKind, &[&str])] = &[
        (FieldKind::Text, &["  Ana López ", "", "x"]),
        (FieldKind::Integer, &["34 años", "-5", "34,5", "treinta", ""]),
        (FieldKind::Phone, &["(555) 123-4567", "+52 55 1234 5678", ""]),
        (FieldKind::Boolean, &["Sí", "no", "TRUE", "1", "", "quizá"]),
        (FieldKind::EnumText, &["mujer", "Masculino", "otro", "x", ""]),
        (FieldKind::List, &[" penicilina, ,polen ,", "a,b,c", ""]),
        (FieldKind::Date, &["HOY", " 2026-01-15 ", ""]),
    ];
    for (kind, inputs) in samples {
        for input in *inputs {
            let once = normalize_str(*kind, input);
            let twice = normalize_str(*kind, &once);
            assert_eq!(once, twice, "{kind:?} not idempotent for {input:?}");
        }
    }
}

#[test]
fn booleans_keep_blank_as_absent() {
    assert_eq!(normalize_str(FieldKind::Boolean, "sí"), "true");
    assert_eq!(normalize_str(FieldKind::Boolean, "Verdadero"), "true");
    assert_eq!(normalize_str(FieldKind::Boolean, "no"), "false");
    assert_eq!(normalize_str(FieldKind::Boolean, "  "), "");
}

#[test]
fn enum_synonyms_collapse() {
    assert_eq!(normalize_str(FieldKind::EnumText, "Hombre"), "M");
    assert_eq!(normalize_str(FieldKind::EnumText, "femenino"), "F");
    assert_eq!(normalize_str(FieldKind::EnumText, "no binario"), "Otro");
}

#[test]
fn lists_are_trimmed_and_joined() {
    assert_eq!(
        normalize_str(FieldKind::List, " penicilina, ,polen ,"),
        "penicilina, polen"
    );
}

#[test]
fn today_literal_is_preserved() {
    assert_eq!(normalize_str(FieldKind::Date, " Hoy "), "hoy");
}

#[test]
fn structured_json_values_are_normalized() {
    assert_eq!(normalize_value(FieldKind::Integer, &json!(34)), "34");
    assert_eq!(normalize_value(FieldKind::Integer, &json!(34.7)), "34");
    assert_eq!(normalize_value(FieldKind::Boolean, &json!(true)), "true");
    assert_eq!(normalize_value(FieldKind::Phone, &json!(5551234567_u64)), "5551234567");
    assert_eq!(
        normalize_value(FieldKind::List, &json!(["penicilina", " polen "])),
        "penicilina, polen"
    );
    assert_eq!(normalize_value(FieldKind::Text, &json!(null)), "");
}

#[test]
fn age_range_is_checked() {
    assert!(validate_age("edad", "0").is_ok());
    assert!(validate_age("edad", "130").is_ok());
    assert!(validate_age("edad", "131").is_err());
    assert!(validate_age("edad", "-1").is_err());
}

#[test]
fn validate_draft_only_checks_present_fields() {
    let schema = FieldSchema::patient();
    let empty = EntityDraft::empty(&schema);
    assert!(validate_draft(&schema, &empty, 10).is_empty());

    let values = json!({"nombre": "Ana", "telefono": "12345", "edad": "200"});
    let draft = EntityDraft::from_values(&schema, values.as_object().expect("object"));
    let errors = validate_draft(&schema, &draft, 10);
    let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
    assert_eq!(fields, vec!["edad", "telefono"]);
}
