//! Sample business tables so agents have something to explore.

use sqlx::SqlitePool;

pub const DEMO_TABLES: &[&str] = &["customers", "orders", "order_summary"];

const DEMO_SCHEMA: &[&str] = &[
    "CREATE TABLE customers (
        customer_id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        email TEXT,
        region TEXT NOT NULL,
        signup_date TEXT NOT NULL
    )",
    "CREATE TABLE orders (
        order_id INTEGER PRIMARY KEY,
        customer_id INTEGER NOT NULL REFERENCES customers(customer_id),
        order_date TEXT NOT NULL,
        status TEXT NOT NULL,
        total_amount REAL NOT NULL
    )",
    "CREATE VIEW order_summary AS
        SELECT c.region AS region, COUNT(o.order_id) AS order_count, SUM(o.total_amount) AS revenue
        FROM customers c LEFT JOIN orders o ON o.customer_id = c.customer_id
        GROUP BY c.region",
];

const DEMO_ROWS: &[&str] = &[
    "INSERT INTO customers (customer_id, name, email, region, signup_date) VALUES
        (1, 'Acme Corp', 'ops@acme.example', 'North', '2024-01-15'),
        (2, 'Globex', 'buyers@globex.example', 'South', '2024-02-03'),
        (3, 'Initech', NULL, 'North', '2024-03-22'),
        (4, 'Umbrella', 'procurement@umbrella.example', 'West', '2024-05-09'),
        (5, 'Hooli', 'finance@hooli.example', 'East', '2024-06-30')",
    "INSERT INTO orders (order_id, customer_id, order_date, status, total_amount) VALUES
        (101, 1, '2024-07-01', 'shipped', 1250.00),
        (102, 1, '2024-07-15', 'shipped', 310.50),
        (103, 2, '2024-07-20', 'pending', 89.99),
        (104, 3, '2024-08-02', 'cancelled', 450.00),
        (105, 4, '2024-08-11', 'shipped', 2200.00),
        (106, 5, '2024-08-19', 'pending', 640.25),
        (107, 2, '2024-09-05', 'shipped', 975.10)",
];

pub(super) async fn load(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    for statement in DEMO_SCHEMA.iter().chain(DEMO_ROWS) {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}
