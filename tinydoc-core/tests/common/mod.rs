// Shared fixture: the tienda_borojo shop database
#![allow(dead_code)]

use chrono::{TimeZone, Utc};
use serde_json::{json, Value};
use tinydoc_core::document::date_value;
use tinydoc_core::{register_shop_procedures, Database};

pub fn fecha(year: i32, month: u32, day: u32) -> Value {
    date_value(Utc.with_ymd_and_hms(year, month, day, 12, 0, 0).unwrap())
}

pub fn productos() -> Vec<Value> {
    vec![
        json!({"_id": 1, "nombre": "Borojó fresco", "categoria": "Fruta", "precio": 5000, "stock": 30, "tags": ["natural", "orgánico"]}),
        json!({"_id": 2, "nombre": "Jugo de borojó", "categoria": "Bebida", "precio": 4000, "stock": 50, "tags": ["bebida", "natural"]}),
        json!({"_id": 3, "nombre": "Borojó deshidratado", "categoria": "Snack", "precio": 6000, "stock": 20, "tags": ["natural", "snack"]}),
        json!({"_id": 4, "nombre": "Concentrado de borojó", "categoria": "Bebida", "precio": 8000, "stock": 4, "tags": ["concentrado"]}),
        json!({"_id": 5, "nombre": "Mermelada de borojó", "categoria": "Dulce", "precio": 7000, "stock": 3, "tags": ["dulce", "natural", "orgánico"]}),
        json!({"_id": 6, "nombre": "Batido energético", "categoria": "Bebida", "precio": 6500, "stock": 25, "tags": ["energía"]}),
        json!({"_id": 7, "nombre": "Helado de borojó", "categoria": "Postre", "precio": 5500, "stock": 15, "tags": ["frío", "dulce"]}),
        json!({"_id": 8, "nombre": "Galletas con borojó", "categoria": "Snack", "precio": 3500, "stock": 40, "tags": ["snack"]}),
        json!({"_id": 9, "nombre": "Vino de borojó", "categoria": "Bebida", "precio": 15000, "stock": 10, "tags": ["licor"]}),
        json!({"_id": 10, "nombre": "Crema de borojó", "categoria": "Cosmético", "precio": 12000, "stock": 8, "tags": ["cosmético", "natural"]}),
    ]
}

pub fn clientes() -> Vec<Value> {
    vec![
        json!({"_id": 1, "nombre": "Juan Pérez", "email": "juan@email.com", "compras": [1, 2], "preferencias": ["natural", "fruta"]}),
        json!({"_id": 2, "nombre": "María Gómez", "email": "maria@email.com", "compras": [3], "preferencias": ["snack"]}),
        json!({"_id": 3, "nombre": "Luis Rojas", "email": "luis@email.com", "compras": [], "preferencias": ["bebida"]}),
        json!({"_id": 4, "nombre": "Ana Ruiz", "email": "ana@email.com", "compras": [1, 4, 6, 8], "preferencias": ["natural"]}),
        json!({"_id": 5, "nombre": "Carlos Mora", "email": "carlos@email.com", "compras": [], "preferencias": ["energía"]}),
        json!({"_id": 6, "nombre": "Laura Torres", "email": "laura@email.com", "compras": [1, 2, 3, 5, 7], "preferencias": ["natural", "dulce"]}),
        json!({"_id": 7, "nombre": "Pedro Salas", "email": "pedro@email.com", "compras": [9], "preferencias": ["licor"]}),
        json!({"_id": 8, "nombre": "Sofía Castro", "email": "sofia@email.com", "compras": [2, 6], "preferencias": ["bebida"]}),
        json!({"_id": 9, "nombre": "Andrés Vega", "email": "andres@email.com", "compras": [10, 1, 3, 4], "preferencias": ["cosmético", "natural"]}),
        json!({"_id": 10, "nombre": "Valentina Ríos", "email": "valentina@email.com", "compras": [5, 7], "preferencias": ["dulce"]}),
    ]
}

fn venta(id: i64, cliente: i64, items: &[(i64, i64)], fecha: Value, total: i64) -> Value {
    let productos: Vec<Value> = items
        .iter()
        .map(|(producto, cantidad)| json!({"productoId": producto, "cantidad": cantidad}))
        .collect();
    json!({"_id": id, "clienteId": cliente, "productos": productos, "fecha": fecha, "total": total})
}

pub fn ventas() -> Vec<Value> {
    vec![
        venta(1, 1, &[(1, 2), (2, 1)], fecha(2025, 1, 5), 14000),
        venta(2, 2, &[(3, 1)], fecha(2025, 1, 20), 6000),
        venta(3, 4, &[(1, 1), (4, 2)], fecha(2025, 2, 3), 21000),
        venta(4, 6, &[(2, 3)], fecha(2025, 2, 14), 12000),
        venta(5, 6, &[(5, 1), (7, 2)], fecha(2025, 3, 1), 18000),
        venta(6, 8, &[(2, 2), (6, 1)], fecha(2025, 3, 15), 14500),
        venta(7, 9, &[(10, 1)], fecha(2025, 3, 28), 12000),
        venta(8, 7, &[(9, 1)], fecha(2025, 4, 2), 15000),
        venta(9, 10, &[(5, 2)], fecha(2025, 4, 18), 14000),
        venta(10, 4, &[(1, 4), (8, 2)], fecha(2025, 5, 9), 27000),
    ]
}

pub fn inventario() -> Vec<Value> {
    vec![
        json!({"_id": 1, "productoId": 1, "lote": "L001", "cantidad": 100, "entrada": fecha(2024, 12, 1)}),
        json!({"_id": 2, "productoId": 2, "lote": "L002", "cantidad": 80, "entrada": fecha(2024, 12, 5)}),
        json!({"_id": 3, "productoId": 8, "lote": "L003", "cantidad": 60, "entrada": fecha(2024, 12, 10)}),
    ]
}

/// Shop database with the four collections loaded and the shop
/// procedures registered
pub fn tienda() -> Database {
    let db = Database::new();
    db.collection("productos").unwrap().insert_many(productos()).unwrap();
    db.collection("clientes").unwrap().insert_many(clientes()).unwrap();
    db.collection("ventas").unwrap().insert_many(ventas()).unwrap();
    db.collection("inventario").unwrap().insert_many(inventario()).unwrap();
    register_shop_procedures(db.procedures());
    db
}

/// Values of `field` across `docs`
pub fn pluck(docs: &[Value], field: &str) -> Vec<Value> {
    docs.iter().map(|doc| doc[field].clone()).collect()
}
