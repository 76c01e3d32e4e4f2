use axum_checkout_api::{config::AppConfig, db::create_pool};
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;

    let pool = create_pool(&config.database_url).await?;
    // Ensure migrations are applied.
    sqlx::migrate!("./migrations").run(&pool).await?;

    let user_id = ensure_user(&pool, "user@example.com", "Demo User").await?;
    seed_products(&pool).await?;

    println!("Seed completed. User ID: {user_id}");
    Ok(())
}

async fn ensure_user(pool: &sqlx::PgPool, email: &str, name: &str) -> anyhow::Result<Uuid> {
    let row: (Uuid,) = sqlx::query_as(
        r#"
        INSERT INTO users (id, email, name)
        VALUES ($1, $2, $3)
        ON CONFLICT (email) DO UPDATE SET name = EXCLUDED.name
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(email)
    .bind(name)
    .fetch_one(pool)
    .await?;

    Ok(row.0)
}

async fn seed_products(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    let products: [(&str, &str, i64, i32, &[&str]); 3] = [
        ("TSHIRT-001", "Plain Tee", 12_000, 40, &["S", "M", "L", "XL"]),
        ("SNEAKER-001", "Court Sneaker", 45_000, 15, &["41", "42", "43"]),
        ("CAP-001", "Snapback Cap", 8_000, 60, &[]),
    ];

    for (code, name, price, instock, sizes) in products {
        let row: (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO products (id, product_code, name, price, instock)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (product_code) DO UPDATE SET price = EXCLUDED.price, instock = EXCLUDED.instock
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(code)
        .bind(name)
        .bind(price)
        .bind(instock)
        .fetch_one(pool)
        .await?;

        for size in sizes {
            sqlx::query(
                r#"
                INSERT INTO product_sizes (id, product_id, size_code)
                VALUES ($1, $2, $3)
                ON CONFLICT (product_id, size_code) DO NOTHING
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(row.0)
            .bind(size)
            .execute(pool)
            .await?;
        }
    }

    Ok(())
}
