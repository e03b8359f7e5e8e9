//! Built-in table definitions for the supply-chain snapshot tables.

use cst_core::{ColumnType, LiveColumn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: &'static str,
    pub column_type: ColumnType,
    /// `VARCHAR(n)` length for text columns; `None` means unbounded `TEXT`.
    pub max_len: Option<u16>,
    pub unique: bool,
}

impl ColumnDef {
    fn sql_type(&self) -> String {
        match (self.column_type, self.max_len) {
            (ColumnType::Text, Some(len)) => format!("VARCHAR({len})"),
            (other, _) => other.sql_name().to_string(),
        }
    }
}

const fn varchar(name: &'static str, len: u16) -> ColumnDef {
    ColumnDef {
        name,
        column_type: ColumnType::Text,
        max_len: Some(len),
        unique: false,
    }
}

const fn unique_varchar(name: &'static str, len: u16) -> ColumnDef {
    ColumnDef {
        unique: true,
        ..varchar(name, len)
    }
}

const fn typed(name: &'static str, column_type: ColumnType) -> ColumnDef {
    ColumnDef {
        name,
        column_type,
        max_len: None,
        unique: false,
    }
}

const fn text(name: &'static str) -> ColumnDef {
    typed(name, ColumnType::Text)
}

const fn int(name: &'static str) -> ColumnDef {
    typed(name, ColumnType::Integer)
}

const fn date(name: &'static str) -> ColumnDef {
    typed(name, ColumnType::Date)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDef {
    pub name: &'static str,
    pub column: &'static str,
}

/// A destination table. Every table also carries a serial `id` and a `created_at`
/// audit column that ingestion never writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalTable {
    pub name: &'static str,
    pub columns: Vec<ColumnDef>,
    pub indexes: Vec<IndexDef>,
}

impl LogicalTable {
    fn new(name: &'static str, columns: Vec<ColumnDef>, indexes: &[(&'static str, &'static str)]) -> Self {
        Self {
            name,
            columns,
            indexes: indexes
                .iter()
                .map(|&(name, column)| IndexDef { name, column })
                .collect(),
        }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn live_columns(&self) -> Vec<LiveColumn> {
        self.columns
            .iter()
            .map(|c| LiveColumn::new(c.name, c.column_type))
            .collect()
    }

    pub fn create_table_sql(&self) -> String {
        let mut lines = vec!["    id SERIAL PRIMARY KEY".to_string()];
        for column in &self.columns {
            let unique = if column.unique { " UNIQUE" } else { "" };
            lines.push(format!("    {} {}{unique}", column.name, column.sql_type()));
        }
        lines.push("    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP".to_string());
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n{}\n)",
            self.name,
            lines.join(",\n")
        )
    }

    pub fn create_index_sql(&self) -> Vec<String> {
        self.indexes
            .iter()
            .map(|idx| {
                format!(
                    "CREATE INDEX IF NOT EXISTS {} ON {}({})",
                    idx.name, self.name, idx.column
                )
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    tables: Vec<LogicalTable>,
}

impl SchemaRegistry {
    pub fn builtin() -> Self {
        use ColumnType::{Decimal, Time, Timestamp};

        let tables = vec![
            LogicalTable::new(
                "allocated_materials_to_orders",
                vec![
                    varchar("order_id", 100),
                    varchar("material_component", 100),
                    varchar("material_component_batch", 100),
                    int("order_quantity"),
                    varchar("fing_batch", 100),
                    varchar("order_status", 50),
                    varchar("ly_number", 100),
                    varchar("mrp_controller", 50),
                    varchar("mrp_group_desc", 100),
                    varchar("fing_material", 100),
                    text("material_comp_description"),
                    varchar("material_comp_type", 100),
                    text("material_description"),
                    typed("modified_date", Timestamp),
                    varchar("operation_number", 50),
                    varchar("operational_sequence_id", 50),
                    varchar("pcn_id", 100),
                    varchar("package_form", 100),
                    varchar("planned_or_process", 100),
                    varchar("plant", 50),
                    varchar("plant_desc", 200),
                    varchar("purchase_doc_number", 100),
                    varchar("recipe_id", 50),
                    varchar("supply_type", 100),
                    varchar("shared_across", 100),
                    varchar("trial", 100),
                    varchar("trial_alias", 100),
                    text("trial_alias_description"),
                    varchar("vendor_id", 100),
                    varchar("teco_flag", 10),
                ],
                &[
                    ("idx_alloc_order_id", "order_id"),
                    ("idx_alloc_trial", "trial_alias"),
                    ("idx_alloc_batch", "material_component_batch"),
                ],
            ),
            LogicalTable::new(
                "available_inventory_report",
                vec![
                    varchar("trial_name", 200),
                    varchar("location", 200),
                    varchar("investigator", 200),
                    text("package_type_description"),
                    varchar("lot", 100),
                    date("expiry_date"),
                    int("packages_awaiting"),
                    int("received_packages"),
                    int("packages_pending_ffu"),
                    int("packages_pending_shipment"),
                    int("shipped_packages"),
                    int("min_qty"),
                    int("max_qty"),
                    int("initial_qty"),
                ],
                &[
                    ("idx_inv_trial", "trial_name"),
                    ("idx_inv_lot", "lot"),
                    ("idx_inv_expiry", "expiry_date"),
                    ("idx_inv_location", "location"),
                ],
            ),
            LogicalTable::new(
                "enrollment_rate_report",
                vec![
                    varchar("trial_alias", 100),
                    varchar("country", 200),
                    varchar("site", 100),
                    int("year"),
                    text("months_data"),
                ],
                &[
                    ("idx_enroll_trial", "trial_alias"),
                    ("idx_enroll_country", "country"),
                ],
            ),
            LogicalTable::new(
                "country_level_enrollment_report",
                vec![
                    varchar("trial_alias", 100),
                    varchar("country_name", 200),
                    varchar("enrollment_level", 50),
                    int("total_enrolled_forecast"),
                    int("total_enrolled_planned"),
                    int("total_enrolled_actual"),
                    typed("enrollment_rate_monthly_actual", Decimal),
                ],
                &[
                    ("idx_country_enroll_trial", "trial_alias"),
                    ("idx_country_enroll_country", "country_name"),
                ],
            ),
            LogicalTable::new(
                "re_evaluation",
                vec![
                    unique_varchar("re_eval_id", 100),
                    date("created_date"),
                    varchar("request_type", 100),
                    varchar("sample_status", 50),
                    varchar("ly_number", 100),
                    varchar("item_code", 100),
                    varchar("lot_number", 100),
                    date("target_date"),
                    varchar("sample_location", 200),
                    varchar("analytical_lab", 200),
                    varchar("analytical_rep_notified", 200),
                    date("modified_date"),
                ],
                &[("idx_reeval_lot", "lot_number"), ("idx_reeval_ly", "ly_number")],
            ),
            LogicalTable::new(
                "rim",
                vec![
                    varchar("name_v", 300),
                    varchar("filename_v", 300),
                    varchar("health_authority_division_c", 100),
                    varchar("type_v", 100),
                    varchar("status_v", 50),
                    date("approved_date_c"),
                    int("major_version_number_v"),
                    varchar("approver_v", 200),
                    date("lilly_receipt_date_c"),
                    varchar("clinical_study_v", 100),
                    varchar("ly_number_c", 100),
                    varchar("submission_outcome", 100),
                ],
                &[
                    ("idx_rim_study", "clinical_study_v"),
                    ("idx_rim_ly", "ly_number_c"),
                    ("idx_rim_status", "status_v"),
                ],
            ),
            LogicalTable::new(
                "material_country_requirements",
                vec![
                    text("client"),
                    varchar("countries", 200),
                    date("created_on"),
                    varchar("ct_compound", 200),
                    varchar("ct_label_group", 100),
                    varchar("ct_pack_type", 100),
                    varchar("ct_pcn_group", 100),
                    date("date_of_last_change"),
                    varchar("material_number", 100),
                    varchar("name_of_person_who_changed", 200),
                    typed("time_of_creation", Time),
                    varchar("trial_alias", 100),
                ],
                &[
                    ("idx_mat_req_country", "countries"),
                    ("idx_mat_req_material", "material_number"),
                    ("idx_mat_req_trial", "trial_alias"),
                ],
            ),
            LogicalTable::new(
                "ip_shipping_timelines_report",
                vec![
                    varchar("ip_helper", 300),
                    varchar("ip_timeline", 100),
                    varchar("country_name", 200),
                    int("lead_time_days"),
                ],
                &[("idx_ship_country", "country_name")],
            ),
            LogicalTable::new(
                "distribution_order_report",
                vec![
                    varchar("trial_alias", 100),
                    varchar("site_id", 100),
                    unique_varchar("order_number", 100),
                    varchar("ivrs_number", 100),
                    varchar("status", 50),
                    date("order_date"),
                    date("requested_delivery_date"),
                    date("actual_delivery_date"),
                ],
                &[
                    ("idx_dist_trial", "trial_alias"),
                    ("idx_dist_order", "order_number"),
                    ("idx_dist_status", "status"),
                ],
            ),
            LogicalTable::new(
                "affiliate_warehouse_inventory",
                vec![
                    varchar("warehouse_name", 200),
                    varchar("country", 200),
                    varchar("material_id", 100),
                    varchar("lot_number", 100),
                    int("quantity_on_hand"),
                    date("expiry_date"),
                    varchar("storage_condition", 100),
                    date("last_inventory_date"),
                ],
                &[
                    ("idx_warehouse_country", "country"),
                    ("idx_warehouse_material", "material_id"),
                ],
            ),
            LogicalTable::new(
                "qdocs",
                vec![
                    varchar("document_id", 100),
                    varchar("document_type", 100),
                    varchar("material_id", 100),
                    varchar("batch_id", 100),
                    text("document_title"),
                    date("issue_date"),
                    date("expiry_date"),
                    varchar("document_status", 50),
                ],
                &[("idx_qdocs_material", "material_id")],
            ),
        ];
        Self { tables }
    }

    pub fn tables(&self) -> &[LogicalTable] {
        &self.tables
    }

    pub fn get(&self, name: &str) -> Option<&LogicalTable> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn table_names(&self) -> Vec<&'static str> {
        self.tables.iter().map(|t| t.name).collect()
    }

    /// CREATE TABLE statements first, then all indexes; one statement per entry.
    pub fn ddl_statements(&self) -> Vec<String> {
        let mut out: Vec<String> = self.tables.iter().map(LogicalTable::create_table_sql).collect();
        out.extend(self.tables.iter().flat_map(LogicalTable::create_index_sql));
        out
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
