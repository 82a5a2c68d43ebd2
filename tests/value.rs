//! Value accessor scenarios: encode/decode round trips over real memory.

use std::sync::Arc;

use half::f16;
use num::complex::{Complex32, Complex64};

use spiderscript::buffer::StrRef;
use spiderscript::interp::Interp;
use spiderscript::mem::{HugePages, Memory};
use spiderscript::symbol::{SymbolData, SymbolKind};
use spiderscript::types::{BitMask, Statement, Statements, TypeKind};
use spiderscript::value::{Datum, Field, Value};
use spiderscript::TypeId;

struct Fixture {
  interp: Interp,
  mem: Arc<Memory>,
}

impl Fixture {
  fn new() -> Fixture {
    let interp = Interp::new();
    let mem = Memory::new("value-test", HugePages::Off, true);
    mem.set_len(256);
    Fixture { interp, mem }
  }

  fn value(&self, name: &str, ty: TypeId, offset: usize) -> Value {
    let module = self.interp.module_by_name("fixture")
      .unwrap_or_else(|| self.interp.new_module("fixture").unwrap());
    let sym = module.symbols()
      .new_symbol(&self.interp, SymbolData {
        kind: SymbolKind::Simple,
        name: name.into(),
        ty: Some(ty),
        ..SymbolData::default()
      })
      .unwrap();
    let length = self.interp.ty(self.interp.chase(ty)).minimum_bytes();
    Field::new(sym, offset, length).bind(&self.mem)
  }

  fn roundtrip(&self, value: &Value, datum: Datum) {
    value.set(&self.interp, &datum);
    assert_eq!(value.get(&self.interp), datum);
    // setting what was read back is stable
    let read = value.get(&self.interp);
    value.set(&self.interp, &read);
    assert_eq!(value.get(&self.interp), read);
  }
}

#[test]
fn integer_and_float_round_trips() {
  let fx = Fixture::new();
  let interp = &fx.interp;

  fx.roundtrip(&fx.value("a", interp.uint8_type(), 0), Datum::U8(0xa5));
  fx.roundtrip(&fx.value("b", interp.uint16_type(), 2), Datum::U16(0xbeef));
  fx.roundtrip(&fx.value("c", interp.uint32_type(), 4), Datum::U32(0xdead_beef));
  fx.roundtrip(&fx.value("d", interp.uint64_type(), 8), Datum::U64(u64::MAX - 3));
  fx.roundtrip(&fx.value("e", interp.sint8_type(), 16), Datum::S8(-7));
  fx.roundtrip(&fx.value("f", interp.sint16_type(), 18), Datum::S16(-30000));
  fx.roundtrip(&fx.value("g", interp.sint32_type(), 20), Datum::S32(i32::MIN));
  fx.roundtrip(&fx.value("h", interp.sint64_type(), 24), Datum::S64(i64::MIN + 1));
  fx.roundtrip(&fx.value("i", interp.float16_type(), 32), Datum::F16(f16::from_f32(1.5)));
  fx.roundtrip(&fx.value("j", interp.float32_type(), 36), Datum::F32(-0.25));
  fx.roundtrip(&fx.value("k", interp.float64_type(), 40), Datum::F64(6.02e23));
}

#[test]
fn complex_round_trips() {
  let fx = Fixture::new();
  let interp = &fx.interp;

  fx.roundtrip(
    &fx.value("c32", interp.complex32_type(), 0),
    Datum::C32(Complex32::new(1.5, -2.0)),
  );
  fx.roundtrip(
    &fx.value("c64", interp.complex64_type(), 8),
    Datum::C64(Complex32::new(0.125, 3.5)),
  );
  fx.roundtrip(
    &fx.value("c128", interp.complex128_type(), 16),
    Datum::C128(Complex64::new(-1.0e100, 2.0e-100)),
  );
}

#[test]
fn string_and_error_round_trips() {
  let fx = Fixture::new();
  let interp = &fx.interp;

  let buffer = interp.new_buffer();
  buffer.append_str("hello, world");

  let value = fx.value("s", interp.string_type(), 0);
  let datum = Datum::Str(Some(StrRef { buffer: buffer.id(), offset: 7, length: 5 }));
  fx.roundtrip(&value, datum);

  value.set(interp, &Datum::Str(None));
  assert_eq!(value.get(interp), Datum::Str(None));

  let err = interp.new_error();
  let value = fx.value("err", interp.error_type(), 16);
  fx.roundtrip(&value, Datum::Error(Some(err.id())));

  value.reset_to_zero();
  assert_eq!(value.get(interp), Datum::Error(None));
}

#[test]
fn enum_round_trips_through_bool() {
  let fx = Fixture::new();
  let interp = &fx.interp;

  // the field's declared type is the Named wrapper; decoding chases it
  let value = fx.value("flag", interp.bool_type(), 0);
  let chased = interp.ty(interp.chase(interp.bool_type()));
  let item = |name: &str| chased.enum_def().by_name(name).cloned().unwrap();

  fx.roundtrip(&value, Datum::Enum(Some(item("true"))));
  assert_eq!(value.get(interp).clone(), Datum::Enum(Some(item("TRUE"))));

  value.set(interp, &Datum::S64(0));
  assert_eq!(value.get(interp), Datum::Enum(Some(item("false"))));

  // a number with no matching item decodes to no item
  value.set(interp, &Datum::S64(17));
  assert_eq!(value.get(interp), Datum::Enum(None));
}

#[test]
#[should_panic(expected = "belongs to")]
fn foreign_enum_items_are_rejected() {
  let fx = Fixture::new();
  let interp = &fx.interp;

  let order = interp.ty(interp.chase(interp.order_type()));
  let foreign = order.enum_def().by_name("EQ").cloned().unwrap();

  let value = fx.value("flag", interp.bool_type(), 0);
  value.set(interp, &Datum::Enum(Some(foreign)));
}

#[test]
fn bitfield_round_trips_as_masks() {
  let fx = Fixture::new();
  let interp = &fx.interp;

  let t = interp.bitfield_type(Statements(vec![
    Statement::bitfield_kind(TypeKind::U8),
    Statement::bitfield_value("ready", 0),
    Statement::bitfield_value("busy", 3),
  ]));
  let def_ty = interp.ty(t);
  let def = def_ty.bitfield_def();

  let value = fx.value("flags", t, 0);
  let mask = BitMask { parent: t, bits: 0b0000_1001 };
  fx.roundtrip(&value, Datum::Bits(mask));

  assert!(mask.contains(def.by_name("ready").unwrap()));
  assert!(mask.contains(def.by_name("busy").unwrap()));
  assert!(!mask.contains(def.by_shift(1).unwrap()));
  let names: Vec<&str> = def.items_in(mask).map(|item| item.name()).collect();
  assert_eq!(names, ["ready", "busy"]);
}

#[test]
fn layouts_index_fields_by_symbol_and_offset() {
  use spiderscript::value::Layout;

  let fx = Fixture::new();
  let interp = &fx.interp;

  let a = fx.value("a", interp.uint32_type(), 0);
  let b = fx.value("b", interp.uint16_type(), 4);
  let layout = Layout::new(vec![*a.field(), *b.field()], 2, 6, 8);

  assert_eq!(layout.fields().len(), 2);
  assert_eq!(layout.field_by_symbol(b.field().symbol()), Some(b.field()));
  assert_eq!(layout.field_by_offset(0), Some(a.field()));
  assert_eq!(layout.field_by_offset(2), None);
  assert_eq!(layout.align_shift(), 2);
  assert_eq!(layout.minimum_size(), 6);
  assert_eq!(layout.padded_size(), 8);
}

#[test]
fn type_ids_round_trip_through_reflected_values() {
  let fx = Fixture::new();
  let interp = &fx.interp;

  let value = fx.value("meta", interp.type_type(), 0);
  fx.roundtrip(&value, Datum::Type(Some(interp.uint64_type())));

  value.reset_to_zero();
  assert_eq!(value.get(interp), Datum::Type(None));
}
