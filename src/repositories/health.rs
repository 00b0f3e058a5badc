use sqlx::PgPool;

pub(crate) async fn ping(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// True once migrations have created the tables the engine writes to.
pub(crate) async fn schema_ready(pool: &PgPool) -> Result<bool, sqlx::Error> {
    let regclass: Option<String> = sqlx::query_scalar("SELECT to_regclass('exam_attempts')::text")
        .fetch_one(pool)
        .await?;
    Ok(regclass.is_some())
}
