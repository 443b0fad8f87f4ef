//! JSON reflection of the object graph
//!
//! Converts objects and whole documents into `serde_json::Value` trees for
//! tooling and debugging. Indirect references serialize as `"N G R"`
//! strings; stream payloads are summarized by their metadata, not embedded.

use crate::document::Document;
use crate::error::Result;
use crate::object::{Dict, Object, Value};
use serde_json::{Map, Value as Json, json};

/// Convert one object. Indirect children appear as reference strings.
pub fn object_to_json(obj: &Object) -> Result<Json> {
    obj.resolve()?;
    if obj.is_indirect() {
        let og = obj.og();
        return Ok(Json::String(format!("{} {} R", og.id, og.r#gen)));
    }
    value_to_json(obj)
}

fn value_to_json(obj: &Object) -> Result<Json> {
    let value = obj.raw_value();
    Ok(match value {
        Value::Null | Value::Reserved | Value::Unresolved(_) | Value::Destroyed => Json::Null,
        Value::Boolean(b) => Json::Bool(b),
        Value::Integer(i) => json!(i),
        Value::Real(t) => match t.parse::<f64>() {
            Ok(v) => json!(v),
            Err(_) => Json::String(t),
        },
        Value::String(s) => match s.as_utf8() {
            Some(text) => Json::String(text.to_string()),
            None => Json::String(format!(
                "b:{}",
                s.as_bytes()
                    .iter()
                    .map(|b| format!("{:02x}", b))
                    .collect::<String>()
            )),
        },
        Value::Name(n) => Json::String(format!("/{}", n.as_str())),
        Value::Operator(op) => Json::String(op),
        Value::InlineImage(data) => Json::String(format!("inline-image:{} bytes", data.len())),
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in &items {
                out.push(object_to_json(item)?);
            }
            Json::Array(out)
        }
        Value::Dictionary(entries) => dict_to_json(&entries)?,
        Value::Stream(s) => {
            let mut map = Map::new();
            map.insert("dict".to_string(), dict_to_json(&s.dict)?);
            Json::Object(map)
        }
    })
}

fn dict_to_json(entries: &Dict) -> Result<Json> {
    let mut keys: Vec<_> = entries.keys().collect();
    keys.sort_by(|a, b| a.as_str().cmp(b.as_str()));
    let mut map = Map::new();
    for key in keys {
        map.insert(format!("/{}", key.as_str()), object_to_json(&entries[key])?);
    }
    Ok(Json::Object(map))
}

/// Reflect a whole document: version, trailer, every object, warnings
pub fn document_to_json(doc: &Document) -> Result<Json> {
    let mut objects = Map::new();
    for obj in doc.all_objects() {
        obj.resolve()?;
        let og = obj.og();
        objects.insert(format!("{} {}", og.id, og.r#gen), value_to_json(&obj)?);
    }
    Ok(json!({
        "version": doc.version(),
        "trailer": value_to_json(&doc.trailer())?,
        "objects": Json::Object(objects),
        "warnings": doc.warnings(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Dict;

    #[test]
    fn test_scalars_to_json() {
        assert_eq!(object_to_json(&Object::null()).unwrap(), Json::Null);
        assert_eq!(object_to_json(&Object::boolean(true)).unwrap(), json!(true));
        assert_eq!(object_to_json(&Object::integer(7)).unwrap(), json!(7));
        assert_eq!(object_to_json(&Object::real("2.5")).unwrap(), json!(2.5));
        assert_eq!(
            object_to_json(&Object::name("Type")).unwrap(),
            json!("/Type")
        );
    }

    #[test]
    fn test_binary_string_to_json() {
        let obj = Object::string(vec![0xde, 0xad]);
        assert_eq!(object_to_json(&obj).unwrap(), json!("b:dead"));
    }

    #[test]
    fn test_containers_to_json() {
        let dict = Object::dictionary(Dict::new());
        dict.replace_key("Kids", Object::array(vec![Object::integer(1)]))
            .unwrap();
        let value = object_to_json(&dict).unwrap();
        assert_eq!(value, json!({"/Kids": [1]}));
    }

    #[test]
    fn test_document_to_json() {
        let doc =
            crate::document::Document::open_bytes("mini.pdf", crate::test_pdf::minimal_pdf())
                .unwrap();
        let value = document_to_json(&doc).unwrap();
        assert_eq!(value["version"], json!("1.7"));
        assert_eq!(value["trailer"]["/Root"], json!("1 0 R"));
        assert_eq!(value["objects"]["1 0"]["/Type"], json!("/Catalog"));
        // the stream object reports its metadata
        assert!(value["objects"]["4 0"]["dict"]["/Length"].is_number());
    }
}
