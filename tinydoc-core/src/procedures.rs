// src/procedures.rs
// Named stored procedures: plain Rust functions looked up by name

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::{json, Value};

use crate::database::Database;
use crate::document::DocumentId;
use crate::error::{Result, TinyDocError};

/// A stored procedure
pub type Procedure = Arc<dyn Fn(&Database, &[Value]) -> Result<Value> + Send + Sync>;

/// Registry of named procedures
#[derive(Clone, Default)]
pub struct ProcedureRegistry {
    procedures: Arc<DashMap<String, Procedure>>,
}

impl std::fmt::Debug for ProcedureRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcedureRegistry").field("names", &self.names()).finish()
    }
}

impl ProcedureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `name`, replacing any previous definition
    pub fn define<S, F>(&self, name: S, procedure: F)
    where
        S: Into<String>,
        F: Fn(&Database, &[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        let name = name.into();
        if self.procedures.insert(name.clone(), Arc::new(procedure)).is_some() {
            log::debug!("redefined procedure '{}'", name);
        } else {
            log::debug!("defined procedure '{}'", name);
        }
    }

    pub fn invoke(&self, db: &Database, name: &str, args: &[Value]) -> Result<Value> {
        // Clone out so the shard lock is not held while the procedure runs
        let procedure = self
            .procedures
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| TinyDocError::ProcedureNotFound(name.to_string()))?;
        procedure(db, args)
    }

    pub fn remove(&self, name: &str) -> bool {
        self.procedures.remove(name).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.procedures.contains_key(name)
    }

    /// Sorted procedure names
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.procedures.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.procedures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.procedures.is_empty()
    }
}

fn bad_args(name: &str, reason: impl Into<String>) -> TinyDocError {
    TinyDocError::ProcedureError {
        name: name.to_string(),
        reason: reason.into(),
    }
}

fn expect_args<'a>(name: &str, args: &'a [Value], count: usize) -> Result<&'a [Value]> {
    if args.len() != count {
        return Err(bad_args(name, format!("expected {} arguments, got {}", count, args.len())));
    }
    Ok(args)
}

fn number_arg(name: &str, value: &Value) -> Result<f64> {
    value
        .as_f64()
        .ok_or_else(|| bad_args(name, format!("expected a number, got {}", value)))
}

fn id_arg(name: &str, value: &Value) -> Result<DocumentId> {
    DocumentId::from_value(value).map_err(|e| bad_args(name, e.to_string()))
}

/// `precio - precio * porcentaje / 100`. Integral results of integer
/// arguments stay integers.
pub fn calcular_descuento(_db: &Database, args: &[Value]) -> Result<Value> {
    let args = expect_args("calcularDescuento", args, 2)?;
    let precio = number_arg("calcularDescuento", &args[0])?;
    let porcentaje = number_arg("calcularDescuento", &args[1])?;

    let result = precio - precio * (porcentaje / 100.0);
    let integral_args = args[0].is_i64() && args[1].is_i64();
    if integral_args && result.fract() == 0.0 {
        Ok(json!(result as i64))
    } else {
        Ok(json!(result))
    }
}

/// True iff the client exists and has more than 3 purchases
pub fn cliente_activo(db: &Database, args: &[Value]) -> Result<Value> {
    let args = expect_args("clienteActivo", args, 1)?;
    let id = id_arg("clienteActivo", &args[0])?;

    let compras = db
        .collection("clientes")?
        .find_by_id(&id)?
        .and_then(|cliente| cliente.get("compras").and_then(Value::as_array).map(Vec::len));
    Ok(json!(compras.map_or(false, |n| n > 3)))
}

/// True iff the product exists and `stock >= cantidad`
pub fn verificar_stock(db: &Database, args: &[Value]) -> Result<Value> {
    let args = expect_args("verificarStock", args, 2)?;
    let id = id_arg("verificarStock", &args[0])?;
    let cantidad = number_arg("verificarStock", &args[1])?;

    let stock = db
        .collection("productos")?
        .find_by_id(&id)?
        .and_then(|producto| producto.get("stock").and_then(Value::as_f64));
    Ok(json!(stock.map_or(false, |s| s >= cantidad)))
}

/// Register `calcularDescuento`, `clienteActivo` and `verificarStock`
pub fn register_shop_procedures(registry: &ProcedureRegistry) {
    registry.define("calcularDescuento", calcular_descuento);
    registry.define("clienteActivo", cliente_activo);
    registry.define("verificarStock", verificar_stock);
}
