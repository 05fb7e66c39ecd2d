//! Read-only accessors over a decoded stream (`spec.md` §4.6).
//!
//! Mirrors the teacher's `FromPool::get` lookup shape
//! (`Noratrieb-coldsquare/src/parse/model/cp_info.rs`) but against the
//! handle table's archived epochs instead of a flat constant pool, and
//! returns `Option` rather than a `Result` for "not found" — absence here
//! is an ordinary outcome of graph traversal, not a decode failure.

use crate::content::{ClassDesc, FieldValue};
use crate::decoder::DecodedStream;
use crate::handle::Handle;

impl DecodedStream {
    /// Finds a class descriptor content by name, searching the most
    /// recently archived epoch first (`spec.md` §4.6 "find class
    /// descriptor by name").
    pub fn find_class_desc(&self, name: &str) -> Option<(Handle, &ClassDesc)> {
        for epoch in self.epochs.iter().rev() {
            for (raw, content) in epoch {
                if let Some(cd) = content.class_desc() {
                    if cd.name == name {
                        return Some((Handle::from(*raw), cd));
                    }
                }
            }
        }
        None
    }

    /// Resolves the value of `field_name` on the ancestor identified by
    /// `class_desc` within the instance at `instance` (`spec.md` §4.6
    /// "resolve field value"). Returns `None` if the instance, the
    /// ancestor's per-class data, or the field itself cannot be found —
    /// never an error.
    pub fn resolve_field(
        &self,
        instance: Handle,
        class_desc: Handle,
        field_name: &str,
    ) -> Option<&FieldValue> {
        let content = self.resolve(instance)?;
        let inst = content.instance()?;
        let data = inst.data_for(class_desc)?;
        data.fields.get(field_name)
    }

    /// Resolves any handle against every archived epoch (most recent
    /// first), without mutating anything.
    pub fn resolve(&self, handle: Handle) -> Option<&crate::content::Content> {
        for epoch in self.epochs.iter().rev() {
            if let Some(content) = epoch.get(&handle.value()) {
                return Some(content);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{ClassType, Content, ContentData, DescFlags, Instance};
    use crate::handle::{Epoch, BASE_WIRE_HANDLE};
    use std::collections::HashMap;

    fn desc_content(name: &str) -> Content {
        Content {
            handle: Some(Handle::from(BASE_WIRE_HANDLE)),
            is_exception: false,
            data: ContentData::ClassDesc(ClassDesc {
                class_type: ClassType::Normal,
                name: name.to_string(),
                serial_version_uid: 0,
                desc_flags: DescFlags::empty(),
                fields: Vec::new(),
                interfaces: None,
                enum_constants: Vec::new(),
                superclass: None,
                annotations: Vec::new(),
                inner_classes: Vec::new(),
                is_inner_class: false,
                is_local_inner_class: false,
                is_static_member_class: false,
            }),
        }
    }

    #[test]
    fn find_class_desc_by_name() {
        let mut epoch: Epoch = HashMap::new();
        epoch.insert(BASE_WIRE_HANDLE, desc_content("pkg.Example"));
        let stream = DecodedStream::test_new(Vec::new(), vec![epoch]);
        let (handle, cd) = stream.find_class_desc("pkg.Example").unwrap();
        assert_eq!(handle.value(), BASE_WIRE_HANDLE);
        assert_eq!(cd.name, "pkg.Example");
        assert!(stream.find_class_desc("pkg.Missing").is_none());
    }

    #[test]
    fn resolve_field_missing_instance_is_none() {
        let stream = DecodedStream::test_new(Vec::new(), vec![HashMap::new()]);
        let missing: Handle = Handle::from(BASE_WIRE_HANDLE);
        assert!(stream.resolve_field(missing, missing, "x").is_none());
    }

    #[test]
    fn resolve_field_present() {
        let desc_handle: Handle = Handle::from(BASE_WIRE_HANDLE);
        let inst_handle: Handle = Handle::from(BASE_WIRE_HANDLE + 1);
        let mut data = crate::content::ClassData::default();
        data.fields
            .insert("x".to_string(), FieldValue::Int(42));
        let instance = Content {
            handle: Some(inst_handle),
            is_exception: false,
            data: ContentData::Instance(Instance {
                class_desc: desc_handle,
                class_data: vec![(desc_handle, data)],
            }),
        };
        let mut epoch: Epoch = HashMap::new();
        epoch.insert(desc_handle.value(), desc_content("pkg.Example"));
        epoch.insert(inst_handle.value(), instance);
        let stream = DecodedStream::test_new(Vec::new(), vec![epoch]);
        match stream.resolve_field(inst_handle, desc_handle, "x") {
            Some(FieldValue::Int(42)) => {}
            other => panic!("unexpected: {other:?}"),
        }
    }
}
