//! Argument Normalizer for the JSON call surface.
//!
//! An operation's arguments arrive either positionally (`["select ...", [1], {...}]`)
//! or as one object keyed by parameter name (`[{"sql": "select ...", "bind": [1]}]`).
//! Both forms are checked against the operation's parameter table and come out
//! as one name-keyed map.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;

use crate::error::DalError;

/// JSON type a parameter accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgType {
    String,
    Number,
    Boolean,
    Object,
    Array,
    Null,
}

impl ArgType {
    fn matches(self, value: &Value) -> bool {
        matches!(
            (self, value),
            (ArgType::String, Value::String(_))
                | (ArgType::Number, Value::Number(_))
                | (ArgType::Boolean, Value::Bool(_))
                | (ArgType::Object, Value::Object(_))
                | (ArgType::Array, Value::Array(_))
                | (ArgType::Null, Value::Null)
        )
    }
}

impl fmt::Display for ArgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ArgType::String => "string",
            ArgType::Number => "number",
            ArgType::Boolean => "boolean",
            ArgType::Object => "object",
            ArgType::Array => "array",
            ArgType::Null => "null",
        })
    }
}

/// What happens when a parameter is not supplied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Required,
    Optional,
    DefaultEmptyArray,
    DefaultEmptyObject,
}

impl Presence {
    fn fallback(self) -> Option<Value> {
        match self {
            Presence::DefaultEmptyArray => Some(Value::Array(Vec::new())),
            Presence::DefaultEmptyObject => Some(Value::Object(serde_json::Map::new())),
            Presence::Required | Presence::Optional => None,
        }
    }

    fn may_skip(self) -> bool {
        self != Presence::Required
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub types: &'static [ArgType],
    pub presence: Presence,
}

impl ParamSpec {
    const fn new(name: &'static str, types: &'static [ArgType], presence: Presence) -> Self {
        Self {
            name,
            types,
            presence,
        }
    }

    fn accepts(&self, value: &Value) -> bool {
        self.types.iter().any(|t| t.matches(value))
    }

    fn type_error(&self) -> DalError {
        let expected = self
            .types
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("|");
        DalError::InvalidArgument(format!(
            "no proper {} parameter data type, expected {expected}",
            self.name
        ))
    }
}

/// Arguments keyed by parameter name. Optional parameters that were not given
/// are absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedArgs(BTreeMap<&'static str, Value>);

impl NormalizedArgs {
    /// The value of `name`, treating an explicit JSON `null` as absent.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name).filter(|v| !v.is_null())
    }

    /// # Errors
    /// `InvalidArgument` if `name` is absent or not a string.
    pub fn str(&self, name: &str) -> Result<&str, DalError> {
        self.get(name)
            .and_then(Value::as_str)
            .ok_or_else(|| DalError::InvalidArgument(format!("missing parameter {name}")))
    }

    pub fn take(&mut self, name: &str) -> Option<Value> {
        self.0.remove(name).filter(|v| !v.is_null())
    }
}

/// Match `args` against `spec`.
///
/// # Errors
/// `InvalidArgument` for a type mismatch, a missing required parameter or
/// unconsumed positional arguments.
pub fn normalize(args: &[Value], spec: &[ParamSpec]) -> Result<NormalizedArgs, DalError> {
    let mut out = BTreeMap::new();

    if let [Value::Object(named)] = args {
        if spec.iter().any(|p| named.contains_key(p.name)) {
            for param in spec {
                match named.get(param.name) {
                    Some(value) if param.accepts(value) => {
                        out.insert(param.name, value.clone());
                    }
                    Some(_) => return Err(param.type_error()),
                    None if param.presence.may_skip() => {
                        if let Some(default) = param.presence.fallback() {
                            out.insert(param.name, default);
                        }
                    }
                    None => {
                        return Err(DalError::InvalidArgument(format!(
                            "missing parameter {}",
                            param.name
                        )));
                    }
                }
            }
            return Ok(NormalizedArgs(out));
        }
    }

    let mut i = 0;
    for param in spec {
        match args.get(i) {
            Some(value) if param.accepts(value) => {
                out.insert(param.name, value.clone());
                i += 1;
            }
            _ if param.presence.may_skip() => {
                if let Some(default) = param.presence.fallback() {
                    out.insert(param.name, default);
                }
            }
            Some(_) => return Err(param.type_error()),
            None => {
                return Err(DalError::InvalidArgument(format!(
                    "missing parameter {}",
                    param.name
                )));
            }
        }
    }
    if i < args.len() {
        return Err(DalError::InvalidArgument(format!(
            "{} unexpected argument(s) after {}",
            args.len() - i,
            spec.last().map_or("the last parameter", |p| p.name)
        )));
    }
    Ok(NormalizedArgs(out))
}

use ArgType as T;
use Presence as Pr;

const OPT: ParamSpec = ParamSpec::new("opt", &[T::Object, T::Null], Pr::Optional);
const BIND: ParamSpec = ParamSpec::new("bind", &[T::Object, T::Array], Pr::DefaultEmptyArray);
const SQL: ParamSpec = ParamSpec::new("sql", &[T::String], Pr::Required);
const TBL: ParamSpec = ParamSpec::new("tbl", &[T::String], Pr::Required);
const WHERE: ParamSpec = ParamSpec::new("where", &[T::Array, T::Object], Pr::Required);
const DATA: ParamSpec = ParamSpec::new("data", &[T::Object], Pr::Required);
const SEQUENCE: ParamSpec = ParamSpec::new("sequence", &[T::String], Pr::Required);

static SQL_BIND: [ParamSpec; 3] = [SQL, BIND, OPT];

/// Parameter table of an operation of the JSON call surface.
#[must_use]
pub fn spec_for(operation: &str) -> Option<&'static [ParamSpec]> {
    static GET_DB_CONNECTION: [ParamSpec; 1] =
        [ParamSpec::new("opt", &[T::Object], Pr::DefaultEmptyObject)];
    static EXECUTE_TRANSACTION: [ParamSpec; 2] = [
        ParamSpec::new("sqlBindArray", &[T::Array], Pr::Required),
        OPT,
    ];
    static SELECT_ONE_ROW: [ParamSpec; 4] = [
        TBL,
        ParamSpec::new("fields", &[T::Array, T::Null], Pr::Optional),
        WHERE,
        OPT,
    ];
    static SELECT_ONE_VALUE: [ParamSpec; 4] = [
        TBL,
        ParamSpec::new("field", &[T::String], Pr::Required),
        WHERE,
        OPT,
    ];
    static SELECT_ALL_ROWS: [ParamSpec; 5] = [
        TBL,
        ParamSpec::new("fields", &[T::Array, T::Null], Pr::Optional),
        ParamSpec::new("where", &[T::Array, T::Object, T::Null], Pr::Optional),
        ParamSpec::new("order", &[T::Array, T::String, T::Null], Pr::Optional),
        OPT,
    ];
    static RUN_PROCEDURE: [ParamSpec; 3] = [
        ParamSpec::new("procName", &[T::String], Pr::Required),
        BIND,
        OPT,
    ];
    static INSERT: [ParamSpec; 3] = [TBL, DATA, OPT];
    static UPDATE: [ParamSpec; 4] = [TBL, DATA, WHERE, OPT];
    static DEL: [ParamSpec; 3] = [TBL, WHERE, OPT];
    static INSERT_RETURNING_ID: [ParamSpec; 4] = [TBL, DATA, SEQUENCE, OPT];
    static INSERT_RETURNING_ID_SQL: [ParamSpec; 4] = [SQL, BIND, SEQUENCE, OPT];

    let spec: &'static [ParamSpec] = match operation {
        "getDbConnection" => &GET_DB_CONNECTION,
        "executeTransaction" => &EXECUTE_TRANSACTION,
        "querySql" | "selectOneRowSql" | "selectOneValueSql" | "selectAllRowsSql"
        | "selectOneClobValueSql" => &SQL_BIND,
        "selectOneRow" => &SELECT_ONE_ROW,
        "selectOneValue" | "selectOneClobValue" => &SELECT_ONE_VALUE,
        "selectAllRows" => &SELECT_ALL_ROWS,
        "runProcedure" => &RUN_PROCEDURE,
        "insert" => &INSERT,
        "update" => &UPDATE,
        "del" => &DEL,
        "insertReturningId" => &INSERT_RETURNING_ID,
        "insertReturningIdSql" => &INSERT_RETURNING_ID_SQL,
        _ => return None,
    };
    Some(spec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sql_bind() -> &'static [ParamSpec] {
        spec_for("selectOneRowSql").unwrap()
    }

    #[test]
    fn positional_and_object_forms_agree() {
        let positional = normalize(&[json!("select 1"), json!([1]), json!({"limit": 5})], sql_bind()).unwrap();
        let object = normalize(
            &[json!({"sql": "select 1", "bind": [1], "opt": {"limit": 5}})],
            sql_bind(),
        )
        .unwrap();
        assert_eq!(positional, object);
    }

    #[test]
    fn defaults_fill_skipped_entries() {
        let args = normalize(&[json!("select 1")], sql_bind()).unwrap();
        assert_eq!(args.get("bind"), Some(&json!([])));
        assert_eq!(args.get("opt"), None);
    }

    #[test]
    fn object_form_fills_defaults_for_missing_keys() {
        let args = normalize(&[json!({"sql": "select 1"})], sql_bind()).unwrap();
        assert_eq!(args.get("sql"), Some(&json!("select 1")));
        assert_eq!(args.get("bind"), Some(&json!([])));
        assert_eq!(args.get("opt"), None);
        assert!(matches!(
            normalize(&[json!({"bind": []})], sql_bind()),
            Err(DalError::InvalidArgument(_))
        ));
    }

    #[test]
    fn optional_entry_is_skipped_on_type_mismatch() {
        // fields is optional, so the object lands in `where`
        let args = normalize(&[json!("emp"), json!({"id": 1})], spec_for("selectOneRow").unwrap()).unwrap();
        assert_eq!(args.get("fields"), None);
        assert_eq!(args.get("where"), Some(&json!({"id": 1})));
    }

    #[test]
    fn required_mismatch_and_leftovers_fail() {
        assert!(matches!(
            normalize(&[json!(42)], sql_bind()),
            Err(DalError::InvalidArgument(_))
        ));
        assert!(matches!(
            normalize(&[json!("x"), json!([]), json!({}), json!("extra")], sql_bind()),
            Err(DalError::InvalidArgument(_))
        ));
        assert!(matches!(
            normalize(&[json!({"sql": 1})], sql_bind()),
            Err(DalError::InvalidArgument(_))
        ));
    }

    #[test]
    fn single_object_without_known_keys_is_positional() {
        let args = normalize(&[json!({"sessionCtx": {}})], spec_for("getDbConnection").unwrap()).unwrap();
        assert_eq!(args.get("opt"), Some(&json!({"sessionCtx": {}})));
        let args = normalize(&[], spec_for("getDbConnection").unwrap()).unwrap();
        assert_eq!(args.get("opt"), Some(&json!({})));
    }

    #[test]
    fn unknown_operation_has_no_table() {
        assert!(spec_for("dropEverything").is_none());
    }
}
