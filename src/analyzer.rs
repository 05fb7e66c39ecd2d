//! Inner/static member class reconnection (`spec.md` §4.5).
//!
//! `javac` mangles nested class names to `Outer$Inner` and gives
//! non-static inner classes a synthetic `this$N` field carrying the
//! enclosing instance. Nothing in the wire format says "this is a member
//! class" — it has to be inferred from the name and field shape, the way
//! the teacher's `resolve_attributes` reinterprets opaque attribute bytes
//! only once the constant pool is fully known
//! (`Noratrieb-coldsquare/src/parse/mod.rs`).

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::content::{ClassType, ContentData, FieldType};
use crate::decoder::{validate_all, DecodedStream};
use crate::error::{DecodeError, DecodeResult};
use crate::handle::{Epoch, Handle};

/// Runs both reconnection phases followed by a rename commit over every
/// epoch, then re-validates (`spec.md` §4.5 "Phase 1" / "Phase 2" /
/// "Rename commit" / "After renaming, run the descriptor validation pass
/// again").
pub fn connect_member_classes(stream: &mut DecodedStream) -> DecodeResult<()> {
    let mut epochs = std::mem::take(&mut stream.epochs);
    for epoch in &mut epochs {
        process_epoch(epoch)?;
    }
    for epoch in &epochs {
        validate_all(epoch)?;
    }
    stream.epochs = epochs;
    Ok(())
}

struct Staged {
    new_name: String,
    is_inner: bool,
    is_local: bool,
    /// Index of the `this$N` field on this descriptor itself, set only
    /// for phase-1 (inner class) stagings.
    inner_field_idx: Option<usize>,
}

fn process_epoch(epoch: &mut Epoch) -> DecodeResult<()> {
    let original_names: HashMap<String, i32> = epoch
        .iter()
        .filter_map(|(h, c)| c.class_desc().map(|cd| (cd.name.clone(), *h)))
        .collect();
    let old_names: HashMap<i32, String> = epoch
        .iter()
        .filter_map(|(h, c)| c.class_desc().map(|cd| (*h, cd.name.clone())))
        .collect();

    let mut staged: HashMap<i32, Staged> = HashMap::new();
    let mut claimed: HashSet<i32> = HashSet::new();

    for (&raw, content) in epoch.iter() {
        let Some(cd) = content.class_desc() else { continue };
        if cd.class_type == ClassType::Proxy {
            continue;
        }
        let Some(field_idx) = cd
            .fields
            .iter()
            .position(|f| is_outer_ref_field_name(&f.name) && f.field_type == FieldType::Object)
        else {
            continue;
        };

        let (outer, inner) = cd.name.rsplit_once('$').ok_or_else(|| {
            DecodeError::validity(
                0,
                "an inner-class-mangled name (Outer$Inner) on a descriptor with a this$N field",
                cd.name.clone(),
            )
        })?;

        let field = &cd.fields[field_idx];
        let decoded_type = field
            .class_name
            .and_then(|h| epoch.get(&h.value()))
            .and_then(|c| c.as_string())
            .and_then(descriptor_to_name)
            .ok_or_else(|| {
                DecodeError::validity(
                    0,
                    "a resolvable object-type descriptor on the this$N field",
                    cd.name.clone(),
                )
            })?;

        if decoded_type != outer || !original_names.contains_key(outer) {
            return Err(DecodeError::validity(
                0,
                format!("this$N field type matching the enclosing class name {outer}"),
                decoded_type,
            ));
        }

        debug!(class = %cd.name, outer, inner, "inner class");
        staged.insert(
            raw,
            Staged {
                new_name: inner.to_string(),
                is_inner: true,
                is_local: inner.as_bytes().first().is_some_and(u8::is_ascii_digit),
                inner_field_idx: Some(field_idx),
            },
        );
        claimed.insert(raw);
    }

    for (&raw, content) in epoch.iter() {
        if claimed.contains(&raw) {
            continue;
        }
        let Some(cd) = content.class_desc() else { continue };
        if cd.class_type == ClassType::Proxy {
            continue;
        }
        let Some((outer, inner)) = cd.name.rsplit_once('$') else {
            continue;
        };
        if !original_names.contains_key(outer) {
            continue;
        }
        debug!(class = %cd.name, outer, inner, "static member class");
        staged.insert(
            raw,
            Staged {
                new_name: inner.to_string(),
                is_inner: false,
                is_local: false,
                inner_field_idx: None,
            },
        );
    }

    commit(epoch, &original_names, &old_names, &staged)
}

const OUTER_FIELD_PREFIX: &str = "this$";

fn is_outer_ref_field_name(name: &str) -> bool {
    name.strip_prefix(OUTER_FIELD_PREFIX)
        .is_some_and(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
}

/// Parses a `L<name-with-slashes>;` object type descriptor into its
/// dotted class name.
fn descriptor_to_name(desc: &str) -> Option<String> {
    let inner = desc.strip_prefix('L')?.strip_suffix(';')?;
    Some(inner.replace('/', "."))
}

fn name_to_descriptor(name: &str) -> String {
    format!("L{};", name.replace('.', "/"))
}

/// `spec.md` §4.5 "Rename commit": reject name collisions, rewrite every
/// field class-descriptor string referencing a renamed class's old name,
/// then apply every staged rename to its descriptor.
fn commit(
    epoch: &mut Epoch,
    original_names: &HashMap<String, i32>,
    old_names: &HashMap<i32, String>,
    staged: &HashMap<i32, Staged>,
) -> DecodeResult<()> {
    for (&raw, s) in staged {
        if let Some(&existing) = original_names.get(&s.new_name) {
            if existing != raw {
                return Err(DecodeError::validity(
                    0,
                    "a rename target not already used by another class descriptor",
                    s.new_name.clone(),
                ));
            }
        }
    }

    let mut string_rewrites: Vec<(i32, String)> = Vec::new();
    for content in epoch.values() {
        let Some(cd) = content.class_desc() else { continue };
        for field in &cd.fields {
            if field.field_type.is_primitive() {
                continue;
            }
            let Some(class_name_handle) = field.class_name else { continue };
            let Some(raw_str) = epoch
                .get(&class_name_handle.value())
                .and_then(|c| c.as_string())
            else {
                continue;
            };
            let Some(decoded) = descriptor_to_name(raw_str) else { continue };
            if let Some((_, s)) = staged.iter().find(|(h, _)| old_names.get(h) == Some(&decoded)) {
                string_rewrites.push((class_name_handle.value(), name_to_descriptor(&s.new_name)));
            }
        }
    }
    for (handle, new_desc) in string_rewrites {
        if let Some(content) = epoch.get_mut(&handle) {
            if let ContentData::String(s) = &mut content.data {
                *s = new_desc;
            }
        }
    }

    for (&raw, s) in staged {
        if let Some(field_idx) = s.inner_field_idx {
            if let Some(cd) = epoch.get_mut(&raw).and_then(|c| c.class_desc_mut()) {
                if let Some(field) = cd.fields.get_mut(field_idx) {
                    field.is_inner_class_reference = true;
                }
            }
        }

        if let Some(outer_name) = old_names.get(&raw).and_then(|n| n.rsplit_once('$')).map(|(o, _)| o.to_string()) {
            if let Some(&outer_raw) = original_names.get(&outer_name) {
                if let Some(outer_cd) = epoch.get_mut(&outer_raw).and_then(|c| c.class_desc_mut()) {
                    let inner_handle: Handle = Handle::from(raw);
                    if !outer_cd.inner_classes.contains(&inner_handle) {
                        outer_cd.inner_classes.push(inner_handle);
                    }
                }
            }
        }

        if let Some(cd) = epoch.get_mut(&raw).and_then(|c| c.class_desc_mut()) {
            if s.is_inner {
                cd.is_inner_class = true;
                cd.is_local_inner_class = s.is_local;
            } else {
                cd.is_static_member_class = true;
            }
            cd.name = s.new_name.clone();
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{ClassDesc, Content, DescFlags, Field};
    use crate::handle::BASE_WIRE_HANDLE;

    fn empty_desc(name: &str) -> ClassDesc {
        ClassDesc {
            class_type: ClassType::Normal,
            name: name.to_string(),
            serial_version_uid: 0,
            desc_flags: DescFlags::SERIALIZABLE,
            fields: Vec::new(),
            interfaces: None,
            enum_constants: Vec::new(),
            superclass: None,
            annotations: Vec::new(),
            inner_classes: Vec::new(),
            is_inner_class: false,
            is_local_inner_class: false,
            is_static_member_class: false,
        }
    }

    fn desc_content(cd: ClassDesc) -> Content {
        Content {
            handle: None,
            is_exception: false,
            data: ContentData::ClassDesc(cd),
        }
    }

    fn string_content(s: &str) -> Content {
        Content {
            handle: None,
            is_exception: false,
            data: ContentData::String(s.to_string()),
        }
    }

    #[test]
    fn static_member_class_renamed_and_linked() {
        let outer_h = BASE_WIRE_HANDLE;
        let inner_h = BASE_WIRE_HANDLE + 1;
        let mut epoch: Epoch = HashMap::new();
        epoch.insert(outer_h, desc_content(empty_desc("pkg.Outer")));
        epoch.insert(inner_h, desc_content(empty_desc("pkg.Outer$Inner")));

        process_epoch(&mut epoch).unwrap();

        let outer = epoch.get(&outer_h).unwrap().class_desc().unwrap();
        assert_eq!(outer.inner_classes, vec![Handle::from(inner_h)]);
        let inner = epoch.get(&inner_h).unwrap().class_desc().unwrap();
        assert_eq!(inner.name, "Inner");
        assert!(inner.is_static_member_class);
        assert!(!inner.is_inner_class);
    }

    #[test]
    fn missing_outer_is_tolerated() {
        let inner_h = BASE_WIRE_HANDLE;
        let mut epoch: Epoch = HashMap::new();
        epoch.insert(inner_h, desc_content(empty_desc("pkg.Missing$Inner")));
        process_epoch(&mut epoch).unwrap();
        let inner = epoch.get(&inner_h).unwrap().class_desc().unwrap();
        assert_eq!(inner.name, "pkg.Missing$Inner");
        assert!(!inner.is_static_member_class);
    }

    #[test]
    fn inner_class_via_this_field_rewrites_field_descriptor() {
        let outer_h = BASE_WIRE_HANDLE;
        let inner_h = BASE_WIRE_HANDLE + 1;
        let type_str_h = BASE_WIRE_HANDLE + 2;

        let mut inner_cd = empty_desc("pkg.Outer$Inner");
        inner_cd.fields.push(Field {
            field_type: FieldType::Object,
            name: "this$0".to_string(),
            class_name: Some(Handle::from(type_str_h)),
            is_inner_class_reference: false,
        });

        let mut epoch: Epoch = HashMap::new();
        epoch.insert(outer_h, desc_content(empty_desc("pkg.Outer")));
        epoch.insert(inner_h, desc_content(inner_cd));
        epoch.insert(type_str_h, string_content("Lpkg/Outer;"));

        process_epoch(&mut epoch).unwrap();

        let inner = epoch.get(&inner_h).unwrap().class_desc().unwrap();
        assert_eq!(inner.name, "Inner");
        assert!(inner.is_inner_class);
        assert!(inner.fields[0].is_inner_class_reference);
        let outer = epoch.get(&outer_h).unwrap().class_desc().unwrap();
        assert_eq!(outer.inner_classes, vec![Handle::from(inner_h)]);
    }

    #[test]
    fn this_field_with_non_matching_name_is_validity_error() {
        let inner_h = BASE_WIRE_HANDLE;
        let type_str_h = BASE_WIRE_HANDLE + 1;
        let mut cd = empty_desc("pkg.NotNested");
        cd.fields.push(Field {
            field_type: FieldType::Object,
            name: "this$0".to_string(),
            class_name: Some(Handle::from(type_str_h)),
            is_inner_class_reference: false,
        });
        let mut epoch: Epoch = HashMap::new();
        epoch.insert(inner_h, desc_content(cd));
        epoch.insert(type_str_h, string_content("Lpkg/Whatever;"));
        assert!(process_epoch(&mut epoch).is_err());
    }

    #[test]
    fn idempotent_on_second_run() {
        let outer_h = BASE_WIRE_HANDLE;
        let inner_h = BASE_WIRE_HANDLE + 1;
        let mut epoch: Epoch = HashMap::new();
        epoch.insert(outer_h, desc_content(empty_desc("pkg.Outer")));
        epoch.insert(inner_h, desc_content(empty_desc("pkg.Outer$Inner")));

        process_epoch(&mut epoch).unwrap();
        let after_first = epoch.get(&inner_h).unwrap().class_desc().unwrap().name.clone();
        process_epoch(&mut epoch).unwrap();
        let after_second = epoch.get(&inner_h).unwrap().class_desc().unwrap().name.clone();
        assert_eq!(after_first, after_second);
    }
}
