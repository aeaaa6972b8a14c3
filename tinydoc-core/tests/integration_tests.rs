// Integration tests for tinydoc core: the tienda_borojo shop workload
mod common;

use common::{pluck, tienda};
use serde_json::json;
use tinydoc_core::{Database, DatabaseOptions, DocumentId, FindOptions, IndexOptions, Projection, TinyDocError};

// ========== INSERTION ==========

#[test]
fn test_insert_producto_and_cliente() {
    let db = tienda();
    let productos = db.collection("productos").unwrap();
    let clientes = db.collection("clientes").unwrap();

    let id = productos
        .insert_one(json!({
            "_id": 11,
            "nombre": "Chocolatina de borojó",
            "categoria": "Snack",
            "precio": 4000,
            "stock": 35,
            "tags": ["dulce", "energía"]
        }))
        .unwrap();
    assert_eq!(id, DocumentId::Int(11));

    clientes
        .insert_one(json!({
            "_id": 11,
            "nombre": "Mario Mendoza",
            "email": "mario@email.com",
            "compras": [],
            "preferencias": ["energético", "natural"]
        }))
        .unwrap();

    assert_eq!(productos.count_documents(&json!({})).unwrap(), 11);
    assert_eq!(clientes.count_documents(&json!({})).unwrap(), 11);

    let dup = productos.insert_one(json!({"_id": 11, "nombre": "otra"}));
    assert!(matches!(dup, Err(TinyDocError::DuplicateKey { .. })));
}

#[test]
fn test_insert_without_id_generates_object_id() {
    let db = tienda();
    let inventario = db.collection("inventario").unwrap();

    let id = inventario.insert_one(json!({"productoId": 3, "lote": "L004", "cantidad": 10})).unwrap();
    assert!(matches!(id, DocumentId::ObjectId(_)));

    let doc = inventario.find_by_id(&id).unwrap().unwrap();
    assert_eq!(doc.get("lote"), Some(&json!("L004")));
}

// ========== READS ==========

#[test]
fn test_find_stock_above_20_with_projection() {
    let db = tienda();
    let productos = db.collection("productos").unwrap();

    let results = productos
        .find(&json!({"stock": {"$gt": 20}}), Some(&json!({"nombre": 1, "_id": 0})))
        .unwrap();

    assert_eq!(
        results,
        vec![
            json!({"nombre": "Borojó fresco"}),
            json!({"nombre": "Jugo de borojó"}),
            json!({"nombre": "Batido energético"}),
            json!({"nombre": "Galletas con borojó"}),
        ]
    );
}

#[test]
fn test_find_clientes_without_compras() {
    let db = tienda();
    let clientes = db.collection("clientes").unwrap();

    let results = clientes
        .find(&json!({"compras": {"$size": 0}}), Some(&json!({"nombre": 1, "_id": 0})))
        .unwrap();
    assert_eq!(pluck(&results, "nombre"), vec![json!("Luis Rojas"), json!("Carlos Mora")]);
}

#[test]
fn test_find_with_options_sort_skip_limit() {
    let db = tienda();
    let productos = db.collection("productos").unwrap();

    let options = FindOptions::new()
        .with_sort(vec![("precio".to_string(), -1)])
        .with_skip(1)
        .with_limit(2)
        .with_projection(Projection::default().include("nombre").include("precio"));
    let results = productos.find_with_options(&json!({}), &options).unwrap();

    assert_eq!(
        results,
        vec![
            json!({"_id": 10, "nombre": "Crema de borojó", "precio": 12000}),
            json!({"_id": 4, "nombre": "Concentrado de borojó", "precio": 8000}),
        ]
    );
}

#[test]
fn test_distinct_categorias() {
    let db = tienda();
    let categorias = db.collection("productos").unwrap().distinct("categoria", &json!({})).unwrap();
    assert_eq!(
        categorias,
        vec![json!("Fruta"), json!("Bebida"), json!("Snack"), json!("Dulce"), json!("Postre"), json!("Cosmético")]
    );
}

// ========== UPDATES ==========

#[test]
fn test_update_one_inc_stock() {
    let db = tienda();
    let productos = db.collection("productos").unwrap();

    let result = productos
        .update_one(&json!({"nombre": "Borojó deshidratado"}), &json!({"$inc": {"stock": 10}}))
        .unwrap();
    assert_eq!(result.matched_count, 1);
    assert_eq!(result.modified_count, 1);

    let doc = productos.find_one(&json!({"_id": 3})).unwrap().unwrap();
    assert_eq!(doc["stock"], json!(30));
}

#[test]
fn test_update_many_push_tag() {
    let db = tienda();
    let productos = db.collection("productos").unwrap();

    let result = productos
        .update_many(&json!({"categoria": "Bebida"}), &json!({"$push": {"tags": "bajo azúcar"}}))
        .unwrap();
    assert_eq!(result.matched_count, 4);
    assert_eq!(result.modified_count, 4);

    assert_eq!(productos.count_documents(&json!({"tags": "bajo azúcar"})).unwrap(), 4);
    let jugo = productos.find_one(&json!({"_id": 2})).unwrap().unwrap();
    assert_eq!(jugo["tags"], json!(["bebida", "natural", "bajo azúcar"]));
}

#[test]
fn test_update_no_match_is_zero_count() {
    let db = tienda();
    let result = db
        .collection("productos")
        .unwrap()
        .update_one(&json!({"nombre": "No existe"}), &json!({"$inc": {"stock": 1}}))
        .unwrap();
    assert_eq!(result.matched_count, 0);
    assert_eq!(result.modified_count, 0);
}

#[test]
fn test_update_type_mismatch_leaves_document() {
    let db = tienda();
    let productos = db.collection("productos").unwrap();

    let err = productos
        .update_one(&json!({"_id": 1}), &json!({"$inc": {"nombre": 1}}))
        .unwrap_err();
    assert!(matches!(err, TinyDocError::TypeMismatch(_)));
    assert_eq!(productos.find_one(&json!({"_id": 1})).unwrap().unwrap()["nombre"], json!("Borojó fresco"));
}

// ========== DELETES ==========

#[test]
fn test_delete_cliente_by_email() {
    let db = tienda();
    let clientes = db.collection("clientes").unwrap();

    let result = clientes.delete_one(&json!({"email": "juan@email.com"})).unwrap();
    assert_eq!(result.deleted_count, 1);
    assert!(clientes.find_one(&json!({"email": "juan@email.com"})).unwrap().is_none());

    let again = clientes.delete_one(&json!({"email": "juan@email.com"})).unwrap();
    assert_eq!(again.deleted_count, 0);
}

#[test]
fn test_delete_many_low_stock() {
    let db = tienda();
    let productos = db.collection("productos").unwrap();

    let result = productos.delete_many(&json!({"stock": {"$lt": 5}})).unwrap();
    assert_eq!(result.deleted_count, 2);
    assert_eq!(productos.count_documents(&json!({})).unwrap(), 8);
    assert_eq!(productos.count_documents(&json!({"stock": {"$lt": 5}})).unwrap(), 0);
}

// ========== REGULAR EXPRESSIONS ==========

#[test]
fn test_regex_queries() {
    let db = tienda();
    let productos = db.collection("productos").unwrap();
    let clientes = db.collection("clientes").unwrap();

    let boro = productos.find(&json!({"nombre": {"$regex": "^Boro", "$options": "i"}}), None).unwrap();
    assert_eq!(pluck(&boro, "_id"), vec![json!(1), json!(3)]);

    let con = productos.find(&json!({"nombre": {"$regex": "con", "$options": "i"}}), None).unwrap();
    assert_eq!(pluck(&con, "_id"), vec![json!(4), json!(8)]);

    let z = clientes.find(&json!({"nombre": {"$regex": "z", "$options": "i"}}), None).unwrap();
    assert_eq!(pluck(&z, "nombre"), vec![json!("Juan Pérez"), json!("María Gómez"), json!("Ana Ruiz")]);

    let invalid = productos.find(&json!({"nombre": {"$regex": "("}}), None);
    assert!(invalid.is_err());
}

// ========== ARRAY OPERATORS ==========

#[test]
fn test_array_queries() {
    let db = tienda();
    let productos = db.collection("productos").unwrap();
    let clientes = db.collection("clientes").unwrap();

    let naturales = clientes.find(&json!({"preferencias": "natural"}), None).unwrap();
    assert_eq!(pluck(&naturales, "_id"), vec![json!(1), json!(4), json!(6), json!(9)]);

    let all = productos.find(&json!({"tags": {"$all": ["natural", "orgánico"]}}), None).unwrap();
    assert_eq!(pluck(&all, "_id"), vec![json!(1), json!(5)]);

    let not_one_tag = productos.find(&json!({"tags": {"$not": {"$size": 1}}}), None).unwrap();
    assert_eq!(
        pluck(&not_one_tag, "_id"),
        vec![json!(1), json!(2), json!(3), json!(5), json!(7), json!(10)]
    );
}

#[test]
fn test_unsupported_predicate() {
    let db = tienda();
    let err = db.collection("productos").unwrap().find(&json!({"stock": {"$where": "x"}}), None).unwrap_err();
    assert!(matches!(err, TinyDocError::UnsupportedPredicate(_)));
}

// ========== AGGREGATION ==========

#[test]
fn test_aggregate_best_sellers() {
    let db = tienda();
    let results = db
        .collection("ventas")
        .unwrap()
        .aggregate(&json!([
            {"$unwind": "$productos"},
            {"$group": {"_id": "$productos.productoId", "totalUnidades": {"$sum": "$productos.cantidad"}}},
            {"$sort": {"totalUnidades": -1}}
        ]))
        .unwrap();

    assert_eq!(results.len(), 10);
    assert_eq!(results[0], json!({"_id": 1, "totalUnidades": 7}));
    assert_eq!(results[1], json!({"_id": 2, "totalUnidades": 6}));
    assert_eq!(results[2], json!({"_id": 5, "totalUnidades": 3}));
}

#[test]
fn test_aggregate_clientes_by_compras() {
    let db = tienda();
    let results = db
        .collection("clientes")
        .unwrap()
        .aggregate(&json!([
            {"$project": {"nombre": 1, "totalCompras": {"$size": "$compras"}}},
            {"$sort": {"totalCompras": -1}}
        ]))
        .unwrap();

    assert_eq!(results[0], json!({"_id": 6, "nombre": "Laura Torres", "totalCompras": 5}));
    assert_eq!(
        pluck(&results, "totalCompras"),
        vec![json!(5), json!(4), json!(4), json!(2), json!(2), json!(2), json!(1), json!(1), json!(0), json!(0)]
    );
}

#[test]
fn test_aggregate_ventas_by_month() {
    let db = tienda();
    let results = db
        .collection("ventas")
        .unwrap()
        .aggregate(&json!([
            {"$group": {"_id": {"mes": {"$month": "$fecha"}}, "totalVentas": {"$sum": "$total"}}}
        ]))
        .unwrap();

    assert_eq!(
        results,
        vec![
            json!({"_id": {"mes": 1}, "totalVentas": 20000}),
            json!({"_id": {"mes": 2}, "totalVentas": 33000}),
            json!({"_id": {"mes": 3}, "totalVentas": 44500}),
            json!({"_id": {"mes": 4}, "totalVentas": 29000}),
            json!({"_id": {"mes": 5}, "totalVentas": 27000}),
        ]
    );
}

#[test]
fn test_aggregate_average_price_by_category() {
    let db = tienda();
    let results = db
        .collection("productos")
        .unwrap()
        .aggregate(&json!([
            {"$group": {"_id": "$categoria", "precioPromedio": {"$avg": "$precio"}}}
        ]))
        .unwrap();

    let bebida = results.iter().find(|r| r["_id"] == json!("Bebida")).unwrap();
    assert_eq!(bebida["precioPromedio"].as_f64(), Some(8375.0));
    let snack = results.iter().find(|r| r["_id"] == json!("Snack")).unwrap();
    assert_eq!(snack["precioPromedio"].as_f64(), Some(4750.0));
    assert_eq!(results.len(), 6);
}

#[test]
fn test_aggregate_top_three_stock() {
    let db = tienda();
    let results = db
        .collection("productos")
        .unwrap()
        .aggregate(&json!([{"$sort": {"stock": -1}}, {"$limit": 3}]))
        .unwrap();
    assert_eq!(pluck(&results, "_id"), vec![json!(2), json!(8), json!(1)]);
}

#[test]
fn test_aggregate_invalid_stage() {
    let db = tienda();
    let err = db.collection("ventas").unwrap().aggregate(&json!([{"$lookup": {}}])).unwrap_err();
    assert!(matches!(err, TinyDocError::AggregationError(_)));
}

// ========== STORED PROCEDURES ==========

#[test]
fn test_shop_procedures() {
    let db = tienda();
    assert_eq!(db.invoke("calcularDescuento", &[json!(10000), json!(20)]).unwrap(), json!(8000));
    assert_eq!(db.invoke("clienteActivo", &[json!(6)]).unwrap(), json!(true));
    assert_eq!(db.invoke("clienteActivo", &[json!(1)]).unwrap(), json!(false));
    assert_eq!(db.invoke("verificarStock", &[json!(1), json!(5)]).unwrap(), json!(true));
    assert_eq!(db.invoke("verificarStock", &[json!(5), json!(5)]).unwrap(), json!(false));
    assert!(matches!(db.invoke("noDefinida", &[]), Err(TinyDocError::ProcedureNotFound(_))));
}

#[test]
fn test_procedures_see_committed_writes() {
    let db = tienda();
    db.collection("clientes")
        .unwrap()
        .update_one(&json!({"_id": 1}), &json!({"$push": {"compras": 3}}))
        .unwrap();
    db.collection("clientes")
        .unwrap()
        .update_one(&json!({"_id": 1}), &json!({"$push": {"compras": 4}}))
        .unwrap();
    assert_eq!(db.invoke("clienteActivo", &[json!(1)]).unwrap(), json!(true));
}

// ========== TRANSACTIONS ==========

fn simular_venta(db: &Database) -> tinydoc_core::Result<()> {
    let mut session = db.start_session();
    session.start_transaction()?;

    let outcome = (|| {
        session.update_one("productos", &json!({"_id": 1}), &json!({"$inc": {"stock": -1}}))?;
        session.insert_one(
            "ventas",
            json!({
                "_id": 11,
                "clienteId": 1,
                "productos": [{"productoId": 1, "cantidad": 1}],
                "fecha": common::fecha(2025, 6, 1),
                "total": 5000
            }),
        )?;
        session.commit_transaction()
    })();

    if outcome.is_err() && session.in_transaction() {
        session.abort_transaction()?;
    }
    session.end_session();
    outcome
}

#[test]
fn test_transaction_sale_commits_then_rolls_back_on_duplicate() {
    let db = tienda();
    let productos = db.collection("productos").unwrap();
    let ventas = db.collection("ventas").unwrap();

    simular_venta(&db).unwrap();
    assert_eq!(productos.find_one(&json!({"_id": 1})).unwrap().unwrap()["stock"], json!(29));
    assert_eq!(ventas.count_documents(&json!({})).unwrap(), 11);

    // Second run fails on ventas _id 11 and the stock decrement is rolled back
    let err = simular_venta(&db).unwrap_err();
    assert!(matches!(err, TinyDocError::DuplicateKey { .. }));
    assert_eq!(productos.find_one(&json!({"_id": 1})).unwrap().unwrap()["stock"], json!(29));
    assert_eq!(ventas.count_documents(&json!({})).unwrap(), 11);
    assert_eq!(db.active_session(), None);
}

#[test]
fn test_transaction_inventory_entry() {
    let db = tienda();
    db.collection("productos")
        .unwrap()
        .insert_one(json!({"_id": 11, "nombre": "Chocolatina de borojó", "categoria": "Snack", "precio": 4000, "stock": 35}))
        .unwrap();

    db.with_transaction(|session| {
        session.insert_one(
            "inventario",
            json!({"_id": 11, "productoId": 11, "lote": "L0011", "cantidad": 50, "entrada": common::fecha(2025, 6, 2)}),
        )?;
        session.update_one("productos", &json!({"_id": 11}), &json!({"$inc": {"stock": 50}}))
    })
    .unwrap();

    let producto = db.collection("productos").unwrap().find_one(&json!({"_id": 11})).unwrap().unwrap();
    assert_eq!(producto["stock"], json!(85));
    assert_eq!(db.collection("inventario").unwrap().count_documents(&json!({"lote": "L0011"})).unwrap(), 1);
}

#[test]
fn test_transaction_return() {
    let db = tienda();
    simular_venta(&db).unwrap();

    db.with_transaction(|session| {
        session.update_one("productos", &json!({"_id": 1}), &json!({"$inc": {"stock": 1}}))?;
        session.delete_one("ventas", &json!({"_id": 11}))
    })
    .unwrap();

    assert_eq!(db.collection("productos").unwrap().find_one(&json!({"_id": 1})).unwrap().unwrap()["stock"], json!(30));
    assert!(db.collection("ventas").unwrap().find_one(&json!({"_id": 11})).unwrap().is_none());
}

#[test]
fn test_reads_outside_transaction_see_committed_state() {
    let db = tienda();
    let mut session = db.start_session();
    session.start_transaction().unwrap();
    session.delete_many("ventas", &json!({})).unwrap();

    assert_eq!(session.count_documents("ventas", &json!({})).unwrap(), 0);
    assert_eq!(db.collection("ventas").unwrap().count_documents(&json!({})).unwrap(), 10);

    session.commit_transaction().unwrap();
    assert_eq!(db.collection("ventas").unwrap().count_documents(&json!({})).unwrap(), 0);
}

// ========== INDEXES ==========

#[test]
fn test_get_indexes_output() {
    let db = tienda();
    let productos = db.collection("productos").unwrap();
    let clientes = db.collection("clientes").unwrap();

    assert_eq!(productos.create_index(&json!({"nombre": 1}), IndexOptions::default()).unwrap(), "nombre_1");
    assert_eq!(
        productos.get_indexes().unwrap(),
        vec![
            json!({"v": 2, "key": {"_id": 1}, "name": "_id_"}),
            json!({"v": 2, "key": {"nombre": 1}, "name": "nombre_1"}),
        ]
    );

    assert_eq!(
        productos.create_index(&json!({"categoria": 1, "precio": 1}), IndexOptions::default()).unwrap(),
        "categoria_1_precio_1"
    );
    assert_eq!(
        productos.get_indexes().unwrap()[2],
        json!({"v": 2, "key": {"categoria": 1, "precio": 1}, "name": "categoria_1_precio_1"})
    );

    clientes.create_index(&json!({"email": 1}), IndexOptions::unique()).unwrap();
    assert_eq!(
        clientes.get_indexes().unwrap()[1],
        json!({"v": 2, "key": {"email": 1}, "name": "email_1", "unique": true})
    );
}

// ========== DATABASE ==========

#[test]
fn test_collection_registry() {
    let db = Database::with_options(DatabaseOptions::new().with_name("tienda_borojo").with_auto_create_collections(false))
        .unwrap();
    assert!(matches!(db.collection("productos"), Err(TinyDocError::CollectionNotFound(_))));

    db.create_collection("productos").unwrap();
    assert!(matches!(db.create_collection("productos"), Err(TinyDocError::CollectionExists(_))));
    assert_eq!(db.list_collections(), vec!["productos".to_string()]);

    db.drop_collection("productos").unwrap();
    assert!(db.list_collections().is_empty());
    assert!(matches!(db.drop_collection("productos"), Err(TinyDocError::CollectionNotFound(_))));
}

#[test]
fn test_database_stats() {
    let db = tienda();
    let stats = db.stats();
    assert_eq!(stats["collections"], json!(4));
    assert_eq!(stats["objects"], json!(33));
    assert_eq!(stats["procedures"], json!(["calcularDescuento", "clienteActivo", "verificarStock"]));
}
