//! `replace_standings`: delete-then-insert replacement of `core.standings`
//! for one (league, season), atomic within a single transaction. The port
//! must never expose a path where the delete commits without the insert.

use anyhow::{Context, Result};
use sqlx::{PgPool, Postgres, Transaction};

use crate::transforms::standings::StandingRow;

pub async fn replace_standings(pool: &PgPool, league_id: i64, season: i64, rows: &[StandingRow]) -> Result<()> {
    let mut tx: Transaction<'_, Postgres> = pool.begin().await.context("beginning standings replace transaction")?;

    let result = replace_standings_in_tx(&mut tx, league_id, season, rows).await;
    match result {
        Ok(()) => {
            tx.commit().await.context("committing standings replace")?;
            Ok(())
        }
        Err(e) => {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::warn!(err = %rollback_err, "db_rollback_failed");
            }
            Err(e)
        }
    }
}

async fn replace_standings_in_tx(tx: &mut Transaction<'_, Postgres>, league_id: i64, season: i64, rows: &[StandingRow]) -> Result<()> {
    sqlx::query("DELETE FROM core.standings WHERE league_id = $1 AND season = $2")
        .bind(league_id)
        .bind(season)
        .execute(&mut **tx)
        .await
        .context("deleting existing standings rows")?;

    for row in rows {
        sqlx::query(
            r#"
            INSERT INTO core.standings
              (league_id, season, team_id, rank, points, goals_diff, group_name,
               form, status, description, played, win, draw, lose,
               goals_for, goals_against, updated_at)
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16, NOW())
            "#,
        )
        .bind(league_id)
        .bind(season)
        .bind(row.team_id)
        .bind(row.rank)
        .bind(row.points)
        .bind(row.goals_diff)
        .bind(&row.group_name)
        .bind(&row.form)
        .bind(&row.status)
        .bind(&row.description)
        .bind(row.played)
        .bind(row.win)
        .bind(row.draw)
        .bind(row.lose)
        .bind(row.goals_for)
        .bind(row.goals_against)
        .execute(&mut **tx)
        .await
        .context("inserting standings row")?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standing_rows_carry_one_entry_per_team() {
        let rows = vec![
            StandingRow {
                team_id: 1,
                rank: 1,
                points: 10,
                goals_diff: 5,
                group_name: None,
                form: Some("WWDLW".into()),
                status: Some("same".into()),
                description: None,
                played: 6,
                win: 3,
                draw: 1,
                lose: 0,
                goals_for: 8,
                goals_against: 3,
            },
        ];
        assert_eq!(rows.len(), 1);
    }
}
