use serde_json::{Map, Value};

/// 负载字段过滤条件
///
/// 匹配语义与 Postgres `jsonb @>` 一致：负载必须包含过滤条件中的每个字段；
/// 嵌套对象逐字段包含，数组要求每个元素都能在负载数组中找到包含它的元素，
/// 标量要求相等。存储层据此实现冷却/限流类的查询，而无需理解具体 topic。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PayloadFilter {
    fields: Map<String, Value>,
}

impl PayloadFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一个字段条件
    pub fn field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn matches(&self, payload: &Value) -> bool {
        match payload {
            Value::Object(object) => self
                .fields
                .iter()
                .all(|(k, v)| object.get(k).is_some_and(|actual| contains(actual, v))),
            _ => self.fields.is_empty(),
        }
    }

    /// 以 JSON 对象形式返回过滤条件（用于 `@>` 绑定参数）
    pub fn to_value(&self) -> Value {
        Value::Object(self.fields.clone())
    }
}

impl From<Map<String, Value>> for PayloadFilter {
    fn from(fields: Map<String, Value>) -> Self {
        Self { fields }
    }
}

fn contains(haystack: &Value, needle: &Value) -> bool {
    match (haystack, needle) {
        (Value::Object(h), Value::Object(n)) => n
            .iter()
            .all(|(k, v)| h.get(k).is_some_and(|hv| contains(hv, v))),
        (Value::Array(h), Value::Array(n)) => {
            n.iter().all(|nv| h.iter().any(|hv| contains(hv, nv)))
        }
        // jsonb 按数值比较数字，42 与 42.0 相等
        (Value::Number(h), Value::Number(n)) => match (h.as_i64(), n.as_i64()) {
            (Some(h), Some(n)) => h == n,
            _ => h.as_f64() == n.as_f64(),
        },
        (h, n) => h == n,
    }
}
