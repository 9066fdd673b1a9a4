//! The business object graph: which table references which.
//!
//! This is hand-maintained. Any new table with a foreign key must be added
//! here, parents before children, or its references will not follow an
//! identifier remap on import. Tables missing from the graph are inserted
//! after every known table in name order, so a foreign key between two of
//! them can be written child-first and fail the whole batch under
//! `foreign_keys=ON`. The import planner warns about such tables.

/// A column holding the identifier of a row in another table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForeignKey {
    pub column: &'static str,
    pub references: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relation {
    pub table: &'static str,
    pub foreign_keys: &'static [ForeignKey],
}

const fn fk(column: &'static str, references: &'static str) -> ForeignKey {
    ForeignKey { column, references }
}

/// Known tables in dependency order: every table appears after the tables it references.
pub const RELATIONS: &[Relation] = &[
    Relation { table: "suppliers", foreign_keys: &[] },
    Relation { table: "customers", foreign_keys: &[] },
    Relation { table: "employees", foreign_keys: &[] },
    Relation { table: "workplaces", foreign_keys: &[] },
    Relation { table: "products", foreign_keys: &[] },
    Relation {
        table: "supplier_transactions",
        foreign_keys: &[fk("supplier_id", "suppliers")],
    },
    Relation {
        table: "customer_transactions",
        foreign_keys: &[fk("customer_id", "customers")],
    },
    Relation {
        table: "work_logs",
        foreign_keys: &[fk("employee_id", "employees"), fk("workplace_id", "workplaces")],
    },
    Relation {
        table: "payroll",
        foreign_keys: &[fk("employee_id", "employees")],
    },
    Relation {
        table: "supplier_payments",
        foreign_keys: &[
            fk("transaction_id", "supplier_transactions"),
            fk("supplier_id", "suppliers"),
        ],
    },
    Relation {
        table: "customer_payments",
        foreign_keys: &[
            fk("transaction_id", "customer_transactions"),
            fk("customer_id", "customers"),
        ],
    },
];

const UNKNOWN_RANK: usize = 1000;

pub fn relation(table: &str) -> Option<&'static Relation> {
    RELATIONS.iter().find(|r| r.table == table)
}

/// Foreign keys declared for `table`; empty for tables outside the graph.
pub fn foreign_keys(table: &str) -> &'static [ForeignKey] {
    relation(table).map(|r| r.foreign_keys).unwrap_or(&[])
}

/// Sort key placing known tables by graph position and unknown tables last, alphabetically.
pub fn table_order_key(table: &str) -> (usize, &str) {
    let rank = RELATIONS
        .iter()
        .position(|r| r.table == table)
        .unwrap_or(UNKNOWN_RANK);
    (rank, table)
}

/// Parents before children.
pub fn insert_order<'a, I>(tables: I) -> Vec<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut ordered: Vec<&str> = tables.into_iter().collect();
    ordered.sort_by(|a, b| table_order_key(a).cmp(&table_order_key(b)));
    ordered.dedup();
    ordered
}

/// Children before parents; the exact reverse of [`insert_order`].
pub fn delete_order<'a, I>(tables: I) -> Vec<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut ordered = insert_order(tables);
    ordered.reverse();
    ordered
}
