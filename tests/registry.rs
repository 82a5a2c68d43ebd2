//! Registry-level scenarios: builtin singletons, mangling, structural
//! deduplication, and layout.

use spiderscript::interp::Interp;
use spiderscript::mangle::{mangle_global_symbol_name, mangle_module_name};
use spiderscript::symbol::{SymbolData, SymbolKind};
use spiderscript::types::{Statement, StatementKind, Statements, TypeKind};
use spiderscript::TypeId;

fn type_names(interp: &Interp, t: TypeId) -> (String, String) {
  (interp.type_canonical_name(t), interp.type_mangled_name(t))
}

#[test]
fn module_name_mangling() {
  assert_eq!(mangle_module_name("builtin"), "_AM7builtinZ");
}

#[test]
fn builtin_singleton_names() {
  let interp = Interp::new();
  let expected = [
    (interp.type_type(), "builtin::Type", "_At"),
    (interp.uint8_type(), "builtin::UInt8", "_Au0"),
    (interp.uint16_type(), "builtin::UInt16", "_Au1"),
    (interp.uint32_type(), "builtin::UInt32", "_Au2"),
    (interp.uint64_type(), "builtin::UInt64", "_Au3"),
    (interp.sint8_type(), "builtin::SInt8", "_Ai0"),
    (interp.sint16_type(), "builtin::SInt16", "_Ai1"),
    (interp.sint32_type(), "builtin::SInt32", "_Ai2"),
    (interp.sint64_type(), "builtin::SInt64", "_Ai3"),
    (interp.float16_type(), "builtin::Float16", "_Af1"),
    (interp.float32_type(), "builtin::Float32", "_Af2"),
    (interp.float64_type(), "builtin::Float64", "_Af3"),
    (interp.complex32_type(), "builtin::Complex32", "_Ac1"),
    (interp.complex64_type(), "builtin::Complex64", "_Ac2"),
    (interp.complex128_type(), "builtin::Complex128", "_Ac3"),
    (interp.string_type(), "builtin::String", "_As"),
    (interp.error_type(), "builtin::Error", "_Ae"),
    (interp.bool_type(), "builtin::Bool", "_Ab"),
    (interp.order_type(), "builtin::Order", "_Ao"),
    (interp.void_type(), "builtin::Void", "_Av"),
  ];
  for (t, cname, mname) in expected {
    assert_eq!(type_names(&interp, t), (cname.to_owned(), mname.to_owned()));
    assert_eq!(interp.type_by_mangled_name(mname), Some(t));
  }

  let null = interp.null_type();
  assert_eq!(interp.type_canonical_name(null), "builtin::Null");
  assert_eq!(
    interp.type_mangled_name(null),
    mangle_global_symbol_name(&interp.builtin_module(), "Null"),
  );
}

#[test]
fn builtin_padding_is_consistent() {
  let interp = Interp::new();
  let mut types = hashbrown::HashMap::new();
  interp.all_types(&mut types);
  for ty in types.values() {
    let align = ty.align_bytes();
    let min = ty.minimum_bytes();
    let pad = ty.padded_bytes();
    assert!(pad >= min, "{:?}: pad {pad} < min {min}", ty.id());
    assert!(pad >= 1 && pad % align == 0, "{:?}: pad {pad} not a multiple of {align}", ty.id());
    // the smallest positive multiple: one alignment unit covers min = 0
    assert!(pad - min < align || (min == 0 && pad == align),
      "{:?}: pad {pad} is not the smallest multiple", ty.id());
  }
}

#[test]
fn pointer_types_deduplicate() {
  let interp = Interp::new();
  let a = interp.pointer_type(interp.uint32_type());
  let b = interp.pointer_type(interp.uint32_type());
  assert_eq!(a, b);

  let ty = interp.ty(a);
  assert_eq!(ty.kind(), TypeKind::Pointer);
  assert_eq!(ty.align_shift(), 3);
  assert_eq!(ty.minimum_bytes(), 8);
  assert_eq!(interp.type_canonical_name(a), "*builtin::UInt32");
  assert!(interp.type_mangled_name(a).starts_with("_Ap"));
  assert_eq!(interp.type_mangled_name(a), "_Apu2");
  assert_eq!(interp.elem(a), Some(interp.uint32_type()));
}

#[test]
fn wrapper_identities() {
  let interp = Interp::new();
  let base = interp.uint16_type();

  let mutable = interp.mutable_type(base);
  let konst = interp.const_type(base);

  // mutable(mutable(T)) == mutable(T); const(mutable(T)) == mutable(T)
  assert_eq!(interp.mutable_type(mutable), mutable);
  assert_eq!(interp.const_type(mutable), mutable);
  // const(const(T)) == const(T); mutable(const(T)) == mutable(T)
  assert_eq!(interp.const_type(konst), konst);
  assert_eq!(interp.mutable_type(konst), mutable);

  // chase is idempotent and `is` sees through wrappers
  assert_eq!(interp.chase(mutable), base);
  assert_eq!(interp.chase(interp.chase(mutable)), base);
  assert!(interp.type_is(mutable, base));
  assert!(interp.type_is(konst, base));
  assert!(interp.type_is(base, base));
  assert!(!interp.type_is(base, mutable));

  // names
  assert_eq!(interp.type_canonical_name(mutable), "mutable builtin::UInt16");
  assert_eq!(interp.type_canonical_name(konst), "const builtin::UInt16");
  assert_eq!(interp.type_mangled_name(mutable), "_Amu1");
  assert_eq!(interp.type_mangled_name(konst), "_Aku1");
}

#[test]
fn named_types_chase_to_their_base() {
  let interp = Interp::new();
  let bool_ty = interp.bool_type();
  assert_eq!(interp.ty(bool_ty).kind(), TypeKind::Named);
  let chased = interp.chase(bool_ty);
  assert_eq!(interp.ty(chased).kind(), TypeKind::Enum);
  assert!(interp.type_is(bool_ty, chased));
}

fn color_list(kind_last: bool) -> Statements {
  // Normalization sorts by kind but is stable within a kind, so the enum
  // values keep their relative order while the kind statement can sit
  // anywhere.
  let mut list = vec![
    Statement::enum_value("red", 0),
    Statement::enum_value("green", 1),
    Statement::enum_value("blue", 4),
  ];
  let kind = Statement::enum_kind(TypeKind::U8);
  if kind_last {
    list.push(kind);
  } else {
    list.insert(0, kind);
  }
  Statements(list)
}

#[test]
fn enum_key_ignores_cross_kind_presentation_order() {
  let interp = Interp::new();
  let a = interp.enum_type(color_list(false));
  let b = interp.enum_type(color_list(true));
  assert_eq!(a, b);

  let ty = interp.ty(a);
  let def = ty.enum_def();
  assert!(!def.is_dense());
  assert_eq!(def.first_number(), 0);
  assert_eq!(def.last_number(), 4);
  assert_eq!(def.by_number(4).unwrap().name(), "blue");
  assert_eq!(def.by_number(3), None);

  // a different content is a different type
  let c = interp.enum_type(Statements(vec![
    Statement::enum_kind(TypeKind::U8),
    Statement::enum_value("red", 0),
  ]));
  assert_ne!(a, c);
}

#[test]
fn enum_types_live_in_the_builtin_enum_module() {
  let interp = Interp::new();
  let t = interp.enum_type(color_list(false));
  let cname = interp.type_canonical_name(t);
  let (prefix, hash) = cname.split_at("builtin::enum::X".len());
  assert_eq!(prefix, "builtin::enum::X");
  assert_eq!(hash.len(), 64);
  assert!(hash.bytes().all(|b| b.is_ascii_hexdigit()));
}

#[test]
fn bool_enum_shape() {
  let interp = Interp::new();
  let def_ty = interp.ty(interp.chase(interp.bool_type()));
  let def = def_ty.enum_def();

  assert_eq!(def.kind(), TypeKind::S8);
  assert!(def.is_dense());
  assert_eq!(def.first_number(), -1);
  assert_eq!(def.last_number(), 0);
  assert_eq!(def.by_name("TRUE").unwrap().number(), -1);
  assert_eq!(def.by_name("False").unwrap().number(), 0);
  assert_eq!(def.by_name("true").unwrap().aliases(), ["True", "TRUE"]);
  assert_eq!(def.items().len(), 2);
}

#[test]
#[should_panic(expected = "enum value for number 0")]
fn enums_require_a_zero_item() {
  let interp = Interp::new();
  let _ = interp.enum_type(Statements(vec![
    Statement::enum_kind(TypeKind::U8),
    Statement::enum_value("one", 1),
  ]));
}

#[test]
fn bitfield_fills_reserved_gaps() {
  let interp = Interp::new();
  let t = interp.bitfield_type(Statements(vec![
    Statement::bitfield_kind(TypeKind::U16),
    Statement::bitfield_value("ready", 0),
    Statement::bitfield_value("busy", 3),
    Statement::bitfield_alias("BUSY", "busy"),
  ]));

  let ty = interp.ty(t);
  let def = ty.bitfield_def();
  assert_eq!(def.items().len(), 16);
  for (shift, item) in def.items().iter().enumerate() {
    assert_eq!(item.shift() as usize, shift);
  }
  assert_eq!(def.by_shift(0).unwrap().name(), "ready");
  assert_eq!(def.by_shift(1).unwrap().name(), "__reserved1");
  assert_eq!(def.by_name("BUSY").unwrap().shift(), 3);
  assert_eq!(def.by_bit(8).unwrap().name(), "busy");
  assert_eq!(ty.minimum_bytes(), 2);

  // identical content is the identical type, wherever the kind and alias
  // statements sit relative to the values
  let again = interp.bitfield_type(Statements(vec![
    Statement::bitfield_alias("BUSY", "busy"),
    Statement::bitfield_value("ready", 0),
    Statement::bitfield_value("busy", 3),
    Statement::bitfield_kind(TypeKind::U16),
  ]));
  assert_eq!(t, again);
}

#[test]
fn struct_packing_layout() {
  let interp = Interp::new();
  let list = || Statements(vec![
    Statement::struct_field("a", interp.uint8_type()),
    Statement::struct_field("b", interp.uint32_type()),
    Statement::struct_field("c", interp.uint8_type()),
  ]);

  let t = interp.struct_type(list());
  assert_eq!(interp.struct_type(list()), t);

  let ty = interp.ty(t);
  let def = ty.struct_def();
  assert_eq!(def.field_by_name("b").unwrap().offset(), 0);
  assert_eq!(def.field_by_name("a").unwrap().offset(), 4);
  assert_eq!(def.field_by_name("c").unwrap().offset(), 5);
  assert_eq!(ty.align_shift(), 2);
  assert_eq!(ty.minimum_bytes(), 6);
  assert_eq!(ty.padded_bytes(), 8);
}

#[test]
fn struct_preserve_order_layout() {
  let interp = Interp::new();
  let t = interp.struct_type(Statements(vec![
    Statement::pragma(StatementKind::PreserveFieldOrderPragma),
    Statement::struct_field("a", interp.uint8_type()),
    Statement::struct_field("b", interp.uint32_type()),
    Statement::struct_field("c", interp.uint8_type()),
  ]));

  let ty = interp.ty(t);
  let def = ty.struct_def();
  assert_eq!(def.field_by_name("a").unwrap().offset(), 0);
  assert_eq!(def.field_by_name("b").unwrap().offset(), 4);
  assert_eq!(def.field_by_name("c").unwrap().offset(), 8);
  assert_eq!(ty.minimum_bytes(), 9);
  assert_eq!(ty.padded_bytes(), 12);
}

#[test]
fn struct_fields_never_overlap_and_stay_aligned() {
  let interp = Interp::new();
  let t = interp.struct_type(Statements(vec![
    Statement::struct_field("a", interp.uint8_type()),
    Statement::struct_field("b", interp.uint64_type()),
    Statement::struct_field("c", interp.uint16_type()),
    Statement::struct_field("d", interp.uint8_type()),
    Statement::struct_field("e", interp.uint32_type()),
    Statement::struct_field("f", interp.uint16_type()),
  ]));

  let ty = interp.ty(t);
  let def = ty.struct_def();
  let mut spans: Vec<(usize, usize)> = Vec::new();
  let mut sum = 0;
  for field in def.fields() {
    let field_ty = interp.ty(field.ty());
    assert_eq!(field.offset() % field_ty.align_bytes(), 0, "{} is misaligned", field.name());
    spans.push((field.offset(), field.offset() + field.length()));
    sum += field.length();
  }
  spans.sort_unstable();
  for pair in spans.windows(2) {
    assert!(pair[0].1 <= pair[1].0, "overlap: {pair:?}");
  }
  assert!(sum <= ty.minimum_bytes());
  // this particular set packs perfectly
  assert_eq!(ty.minimum_bytes(), 18);
}

#[test]
fn struct_pragmas_raise_alignment_and_size() {
  let interp = Interp::new();
  let t = interp.struct_type(Statements(vec![
    Statement::align_pragma(4),
    Statement::min_size_pragma(40),
    Statement::struct_field("a", interp.uint32_type()),
  ]));
  let ty = interp.ty(t);
  assert_eq!(ty.align_shift(), 4);
  assert_eq!(ty.minimum_bytes(), 40);
  assert_eq!(ty.padded_bytes(), 48);
}

#[test]
fn empty_struct_is_void() {
  let interp = Interp::new();
  let t = interp.struct_type(Statements(Vec::new()));
  assert_eq!(t, interp.void_type());
  let ty = interp.ty(t);
  assert_eq!(ty.minimum_bytes(), 0);
  assert_eq!(ty.padded_bytes(), 1);
}

fn tag_setup(interp: &Interp) -> (TypeId, spiderscript::SymbolId) {
  let tag_enum = interp.enum_type(Statements(vec![
    Statement::enum_kind(TypeKind::U8),
    Statement::enum_value("small", 0),
    Statement::enum_value("big", 1),
  ]));
  let module = interp.new_module("shapes").unwrap();
  let tag_sym = module.symbols()
    .new_symbol(interp, SymbolData {
      kind: SymbolKind::Simple,
      name: "kind".into(),
      ty: Some(tag_enum),
      ..SymbolData::default()
    })
    .unwrap();
  (tag_enum, tag_sym)
}

#[test]
fn union_layout_is_per_tag() {
  let interp = Interp::new();
  let (tag_enum, tag_sym) = tag_setup(&interp);
  let item = |name: &str| interp.ty(tag_enum).enum_def().by_name(name).cloned().unwrap();

  let t = interp.union_type(Statements(vec![
    Statement::union_tag(tag_sym, tag_enum),
    Statement::union_field(item("small"), "x", interp.uint8_type()),
    Statement::union_field(item("small"), "y", interp.uint8_type()),
    Statement::union_field(item("big"), "x", interp.uint64_type()),
  ]));

  let ty = interp.ty(t);
  let def = ty.union_def();

  // fields of the same tag are disjoint...
  let small_x = def.field_by_tag_and_name(&item("small"), "x").unwrap();
  let small_y = def.field_by_tag_and_name(&item("small"), "y").unwrap();
  assert_ne!(small_x.offset(), small_y.offset());

  // ...while fields of different tags may share bytes
  let big_x = def.field_by_tag_and_name(&item("big"), "x").unwrap();
  assert_eq!(big_x.offset(), 0);
  assert_eq!(big_x.length(), 8);

  // the union is as large as its largest arm and as aligned as its most
  // demanding field
  assert_eq!(ty.minimum_bytes(), 8);
  assert_eq!(ty.align_shift(), 3);
  assert_eq!(def.fields_by_tag(&item("small")).count(), 2);

  // same content, same type; the tag statement can sit anywhere relative
  // to the fields
  let again = interp.union_type(Statements(vec![
    Statement::union_field(item("small"), "x", interp.uint8_type()),
    Statement::union_field(item("small"), "y", interp.uint8_type()),
    Statement::union_field(item("big"), "x", interp.uint64_type()),
    Statement::union_tag(tag_sym, tag_enum),
  ]));
  assert_eq!(t, again);
}

#[test]
#[should_panic(expected = "not Enum")]
fn union_tags_must_chase_to_an_enum() {
  let interp = Interp::new();
  let module = interp.new_module("bad_shapes").unwrap();
  let tag_sym = module.symbols()
    .new_symbol(&interp, SymbolData {
      kind: SymbolKind::Simple,
      name: "kind".into(),
      ty: Some(interp.uint8_type()),
      ..SymbolData::default()
    })
    .unwrap();
  let _ = interp.union_type(Statements(vec![
    Statement::union_tag(tag_sym, interp.uint8_type()),
  ]));
}

#[test]
fn modules_enforce_reservations_and_uniqueness() {
  let interp = Interp::new();
  assert!(interp.new_module("builtin").is_err());
  assert!(interp.new_module("this").is_err());
  assert!(interp.new_module("builtin::anything").is_err());
  assert!(interp.new_module("not a name").is_err());

  let module = interp.new_module("mine").unwrap();
  assert_eq!(module.mangled_name(), "_AM4mineZ");
  assert!(interp.new_module("mine").is_err());

  // seeded imports resolve through the registry
  assert_eq!(
    module.import(&interp, "builtin").unwrap().canonical_name(),
    "builtin",
  );
  assert_eq!(module.import(&interp, "this").unwrap().canonical_name(), "mine");
}

#[test]
fn duplicate_symbols_are_domain_errors() {
  let interp = Interp::new();
  let module = interp.new_module("dupes").unwrap();
  let data = || SymbolData {
    kind: SymbolKind::Simple,
    name: "x".into(),
    ty: Some(interp.uint8_type()),
    ..SymbolData::default()
  };
  assert!(module.symbols().new_symbol(&interp, data()).is_ok());
  let err = module.symbols().new_symbol(&interp, data()).unwrap_err();
  assert!(err.to_string().contains("duplicate symbol"));
}

#[test]
fn signatures_deduplicate_by_rendered_form() {
  let interp = Interp::new();

  let a = interp.generic_signature_builder().with_type().with_uint().build();
  let b = interp.generic_signature_builder().with_type().with_uint().build();
  assert_eq!(a, b);
  assert_eq!(interp.gen_sig(a).render(&interp), "[type, uint]");

  let c = interp.generic_signature_builder().with_uint().with_type().build();
  assert_ne!(a, c);
  assert_eq!(interp.gen_sig(c).render(&interp), "[uint, type]");

  let empty = interp.generic_signature_builder().build();
  assert_eq!(interp.gen_sig(empty).render(&interp), "[]");

  let u64t = interp.uint64_type();
  let f = interp.function_signature_builder()
    .with_return(u64t)
    .with_positional_arg(u64t)
    .with_positional_arg(u64t)
    .build();
  assert_eq!(
    interp.func_sig(f).render(&interp),
    "(builtin::UInt64, builtin::UInt64): builtin::UInt64",
  );

  let void_sig = interp.function_signature_builder().build();
  assert_eq!(interp.func_sig(void_sig).render(&interp), "(): builtin::Void");
  assert_eq!(interp.function_signature_builder().build(), void_sig);

  // named arguments render in name order regardless of insertion order
  let g1 = interp.function_signature_builder()
    .with_named_arg("beta", u64t)
    .with_named_arg("alpha", u64t)
    .build();
  let g2 = interp.function_signature_builder()
    .with_named_arg("alpha", u64t)
    .with_named_arg("beta", u64t)
    .build();
  assert_eq!(g1, g2);
  assert_eq!(
    interp.func_sig(g1).render(&interp),
    "(alpha: builtin::UInt64, beta: builtin::UInt64): builtin::Void",
  );
}

#[test]
fn generic_symbol_names_derive_from_signatures() {
  use spiderscript::symbol::{FunctionSymbolData, GenericSymbolData, GenericValue};

  let interp = Interp::new();
  let module = interp.new_module("gens").unwrap();
  let sig = interp.generic_signature_builder().with_type().build();

  let unbound = module.symbols()
    .new_symbol(&interp, SymbolData {
      kind: SymbolKind::UnboundGenericType,
      name: "Box".into(),
      ty: Some(interp.type_type()),
      generic: GenericSymbolData {
        signature: Some(sig),
        param_names: vec!["T".into()],
        param_values: Vec::new(),
      },
      ..SymbolData::default()
    })
    .unwrap();
  let unbound = interp.symbol(unbound);
  assert_eq!(unbound.canonical_name(), "gens::Box[T: type]");
  assert_eq!(unbound.mangled_name(), "_AM4gensGN3BoxU1tZ");

  let bound = module.symbols()
    .new_symbol(&interp, SymbolData {
      kind: SymbolKind::BoundGenericType,
      name: "Box".into(),
      ty: Some(interp.type_type()),
      generic: GenericSymbolData {
        signature: Some(sig),
        param_names: vec!["T".into()],
        param_values: vec![GenericValue::Type(interp.uint32_type())],
      },
      ..SymbolData::default()
    })
    .unwrap();
  let bound = interp.symbol(bound);
  assert_eq!(bound.canonical_name(), "gens::Box#[builtin::UInt32]");
  assert_eq!(bound.mangled_name(), "_AM4gensGN3BoxB1tu2Z");
  assert_eq!(interp.symbol_by_mangled_name("_AM4gensGN3BoxB1tu2Z"), Some(bound.id()));

  let u64t = interp.uint64_type();
  let func_sig = interp.function_signature_builder()
    .with_return(u64t)
    .with_positional_arg(u64t)
    .with_positional_arg(u64t)
    .build();
  let func = module.symbols()
    .new_symbol(&interp, SymbolData {
      kind: SymbolKind::SimpleFunction,
      name: "add".into(),
      ty: Some(interp.void_type()),
      function: FunctionSymbolData {
        signature: Some(func_sig),
        positional_names: vec!["a".into(), "b".into()],
      },
      ..SymbolData::default()
    })
    .unwrap();
  let func = interp.symbol(func);
  assert_eq!(
    func.canonical_name(),
    "gens::add#(a: builtin::UInt64, b: builtin::UInt64): builtin::UInt64",
  );
  assert_eq!(func.mangled_name(), "_AM4gensGN3addFu32u3u30Z");

  // arity mismatches are domain errors
  let err = module.symbols()
    .new_symbol(&interp, SymbolData {
      kind: SymbolKind::UnboundGenericType,
      name: "Pair".into(),
      ty: Some(interp.type_type()),
      generic: GenericSymbolData {
        signature: Some(sig),
        param_names: vec!["T".into(), "U".into()],
        param_values: Vec::new(),
      },
      ..SymbolData::default()
    })
    .unwrap_err();
  assert!(err.to_string().contains("count mismatch"));
}

#[test]
fn gensyms_never_collide() {
  let interp = Interp::new();
  let module = interp.new_module("gensyms").unwrap();
  let a = module.symbols().new_gensym(&interp, interp.uint8_type());
  let b = module.symbols().new_gensym(&interp, interp.uint8_type());
  assert_ne!(a, b);
  let a = interp.symbol(a);
  assert!(a.local_name().starts_with("__G"));
  assert_eq!(a.ty(), interp.uint8_type());
}

#[test]
fn concurrent_identical_definitions_publish_one_type() {
  let interp = std::sync::Arc::new(Interp::new());
  let mut results = Vec::new();

  std::thread::scope(|scope| {
    let mut handles = Vec::new();
    for _ in 0..8 {
      let interp = interp.clone();
      handles.push(scope.spawn(move || {
        interp.struct_type(Statements(vec![
          Statement::struct_field("x", interp.uint64_type()),
          Statement::struct_field("y", interp.uint16_type()),
        ]))
      }));
    }
    for handle in handles {
      results.push(handle.join().unwrap());
    }
  });

  let first = results[0];
  assert!(results.iter().all(|&t| t == first));
}
