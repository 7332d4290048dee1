#[cfg(test)]
mod tests {
    use crate::label::{Labels, Variant};
    use crate::record::payload::{InterfaceRegistry, Payload, PayloadKit};
    use crate::record::{DataRecord, Record, SortMark};
    use std::sync::Arc;

    fn number(variant: &Arc<Variant>, id: crate::label::FieldId, value: i64) -> DataRecord {
        let mut rec = DataRecord::new(Arc::clone(variant), InterfaceRegistry::INT);
        rec.set_field(id, Payload::new(value));
        rec
    }

    #[test]
    fn set_get_take() {
        let mut labels = Labels::new();
        let x = labels.field("x");
        let t = labels.tag("t");
        let variant = Arc::new(Variant::new([x], [t], []));

        let mut rec = DataRecord::new(Arc::clone(&variant), InterfaceRegistry::INT);
        rec.set_field(x, Payload::new(7i64));
        rec.set_tag(t, -3);

        assert_eq!(rec.field(x).unwrap().downcast_ref::<i64>(), Some(&7));
        assert_eq!(rec.tag(t), Some(-3));

        let taken = rec.take_field(x);
        assert_eq!(taken.downcast_ref::<i64>(), Some(&7));
        assert!(rec.field(x).is_none());
        assert_eq!(rec.take_tag(t), -3);
    }

    #[test]
    #[should_panic(expected = "not declared")]
    fn setting_undeclared_field_is_fatal() {
        let mut labels = Labels::new();
        let x = labels.field("x");
        let y = labels.field("y");
        let variant = Arc::new(Variant::new([x], [], []));
        let mut rec = DataRecord::new(variant, InterfaceRegistry::INT);
        rec.set_field(y, Payload::new(0i64));
    }

    #[test]
    #[should_panic(expected = "taken twice")]
    fn double_take_is_fatal() {
        let mut labels = Labels::new();
        let x = labels.field("x");
        let variant = Arc::new(Variant::new([x], [], []));
        let mut rec = number(&variant, x, 1);
        let _ = rec.take_field(x);
        let _ = rec.take_field(x);
    }

    #[test]
    fn copy_shares_payloads() {
        let mut labels = Labels::new();
        let x = labels.field("x");
        let variant = Arc::new(Variant::new([x], [], []));
        let rec = number(&variant, x, 42);
        assert_eq!(rec.field(x).unwrap().holders(), 1);

        let copy = rec.clone();
        assert_eq!(rec.field(x).unwrap().holders(), 2);

        drop(copy);
        assert_eq!(rec.field(x).unwrap().holders(), 1);
    }

    #[test]
    fn matching_is_on_populated_ids() {
        let mut labels = Labels::new();
        let x = labels.field("x");
        let t = labels.tag("t");
        let variant = Arc::new(Variant::new([x], [t], []));

        let mut rec = number(&variant, x, 1);
        let wants_tag = Variant::new([], [t], []);
        // Declared but never set does not satisfy a pattern.
        assert!(!rec.matches(&wants_tag));
        rec.set_tag(t, 0);
        assert!(rec.matches(&wants_tag));
        assert!(rec.matches(&Variant::empty()));
        assert_eq!(rec.shape(), Variant::new([x], [t], []));
    }

    #[test]
    fn absorb_widens_and_keeps_existing() {
        let mut labels = Labels::new();
        let x = labels.field("x");
        let y = labels.field("y");
        let t = labels.tag("t");

        let main_variant = Arc::new(Variant::new([x], [t], []));
        let aux_variant = Arc::new(Variant::new([y], [t], []));

        let mut main = number(&main_variant, x, 1);
        main.set_tag(t, 10);
        let mut aux = number(&aux_variant, y, 2);
        aux.set_tag(t, 99);

        main.absorb(aux);
        assert_eq!(main.field(x).unwrap().downcast_ref::<i64>(), Some(&1));
        assert_eq!(main.field(y).unwrap().downcast_ref::<i64>(), Some(&2));
        // The main side's entry wins on overlap.
        assert_eq!(main.tag(t), Some(10));
        assert!(main.variant().has_field(y));
    }

    #[test]
    fn builtin_kits_round_payloads() {
        let registry = InterfaceRegistry::with_builtins();

        let int_kit = registry.kit(InterfaceRegistry::INT);
        let payload = int_kit.deserialize("25").unwrap();
        assert_eq!(payload.downcast_ref::<i64>(), Some(&25));
        let mut text = String::new();
        int_kit.serialize(&payload, &mut text).unwrap();
        assert_eq!(text, "25");
        assert!(int_kit.deserialize("not a number").is_err());

        let json_kit = registry.kit(InterfaceRegistry::JSON);
        let payload = json_kit.deserialize(r#"{"a": 1}"#).unwrap();
        let copy = json_kit.copy(&payload);
        assert_eq!(
            copy.downcast_ref::<serde_json::Value>(),
            payload.downcast_ref::<serde_json::Value>()
        );
        assert_eq!(copy.holders(), 1);
    }

    #[test]
    #[should_panic(expected = "no payload kit")]
    fn unknown_interface_is_fatal() {
        let registry = InterfaceRegistry::new();
        let _ = registry.kit(InterfaceRegistry::INT);
    }

    #[test]
    fn dump_renders_names_and_values() {
        let mut labels = Labels::new();
        let x = labels.field("x");
        let t = labels.tag("t");
        let variant = Arc::new(Variant::new([x], [t], []));
        let registry = InterfaceRegistry::with_builtins();

        let mut rec = number(&variant, x, 5);
        rec.set_tag(t, 2);
        assert_eq!(rec.dump(&labels, &registry), "{x = 5, <t> = 2}");

        let json = rec.to_json(&labels, &registry);
        assert_eq!(json["fields"]["x"], "5");
        assert_eq!(json["tags"]["t"], 2);
        assert_eq!(json["interface"], "i64");
    }

    #[test]
    fn control_records_copy_trivially() {
        let mark = SortMark { level: 1, seq: 9 };
        match Record::SortBegin(mark).clone() {
            Record::SortBegin(copy) => assert_eq!(copy, mark),
            other => panic!("Expected a sort-begin record, got {}", other),
        }
        assert!(Record::Terminate.clone().is_terminate());
        assert_eq!(Record::Probe.kind_name(), "probe");
    }
}
