#![allow(dead_code)]

use cqlbit::testing::RecordingDriver;
use cqlbit::*;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub region: String,
    pub id: i64,
    pub tenant: String,
    pub status: String,
    pub tags: Vec<String>,
}

impl Entity for Order {
    fn definition() -> EntityDef {
        EntityDef::new("Order", KeyspaceDef::new("shop").suffix("tenant", 0))
            .table(TableDef::new("orders").partition_key("region").clustering_key("id", ClusteringOrder::Desc))
            .table(
                TableDef::new("orders_by_status")
                    .partition_key("region")
                    .clustering_key("status", ClusteringOrder::Asc)
                    .clustering_key("id", ClusteringOrder::Asc),
            )
            .column(ColumnDef::new("region", DeclaredType::String))
            .column(ColumnDef::new("id", DeclaredType::I64))
            .column(ColumnDef::new("tenant", DeclaredType::String).suffix("tenant"))
            .column(ColumnDef::new("status", DeclaredType::Enum("Status")))
            .column(ColumnDef::new("tags", DeclaredType::list(DeclaredType::String)).mandatory())
    }

    fn to_row(&self) -> Row {
        Row::new()
            .with("region", self.region.as_str())
            .with("id", self.id)
            .with("tenant", self.tenant.as_str())
            .with("status", self.status.as_str())
            .with("tags", self.tags.clone())
    }

    fn from_row(row: &Row) -> Result<Self, CqlError> {
        Ok(Order {
            region: row.get_as("region")?,
            id: row.get_as("id")?,
            tenant: row.get_as("tenant")?,
            status: row.get_as("status")?,
            tags: row.get_as("tags")?,
        })
    }
}

/// Lives in the same namespace as orders but is keyed by a warehouse suffix.
pub struct Shipment;

impl Entity for Shipment {
    fn definition() -> EntityDef {
        EntityDef::new("Shipment", KeyspaceDef::new("logistics").suffix("warehouse", 0))
            .table(TableDef::new("shipments").partition_key("id"))
            .column(ColumnDef::new("id", DeclaredType::I64))
            .column(ColumnDef::new("warehouse", DeclaredType::String).suffix("warehouse"))
    }

    fn to_row(&self) -> Row {
        Row::new()
    }

    fn from_row(_row: &Row) -> Result<Self, CqlError> {
        Ok(Shipment)
    }
}

pub struct Address;

impl Entity for Address {
    fn definition() -> EntityDef {
        EntityDef::udt("address").column(ColumnDef::new("city", DeclaredType::String))
    }

    fn to_row(&self) -> Row {
        Row::new()
    }

    fn from_row(_row: &Row) -> Result<Self, CqlError> {
        Ok(Address)
    }
}

pub struct PageViews {
    pub page: String,
}

impl Entity for PageViews {
    fn definition() -> EntityDef {
        EntityDef::new("PageViews", KeyspaceDef::new("stats"))
            .table(TableDef::new("page_views").partition_key("page"))
            .column(ColumnDef::new("page", DeclaredType::String))
            .column(ColumnDef::new("views", DeclaredType::I64).counter())
    }

    fn to_row(&self) -> Row {
        Row::new().with("page", self.page.as_str())
    }

    fn from_row(row: &Row) -> Result<Self, CqlError> {
        Ok(PageViews { page: row.get_as("page")? })
    }
}

cqlbit::inventory::submit! { EntityRegistration::of::<Order>("shop") }
cqlbit::inventory::submit! { EntityRegistration::of::<Shipment>("shop") }
cqlbit::inventory::submit! { EntityRegistration::of::<Address>("shop") }
cqlbit::inventory::submit! { EntityRegistration::of::<PageViews>("stats") }

pub fn order(id: i64) -> Order {
    Order { region: "us".into(), id, tenant: "acme".into(), status: "OPEN".into(), tags: vec!["gift".into()] }
}

pub fn create_test_session() -> (Arc<RecordingDriver>, Session) {
    let driver = RecordingDriver::new().expect("Failed to start recording driver");
    let session = Session::with_defaults(driver.clone());
    (driver, session)
}

/// Binding of the `id` column, wherever it sits in the request.
pub fn binds_id(request: &Request, id: i64) -> bool {
    request.bindings().iter().any(|v| *v == Value::BigInt(id))
}
