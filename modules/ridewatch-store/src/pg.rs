use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use ridewatch_common::{
    haversine_mi, ControlJudge, Distance, Event, RideWatchError, RunCounts, RunError, RunOutcome,
    RunReport,
};
use sqlx::PgPool;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::reconcile::reconcile;
use crate::repository::{EventRepository, UpsertOutcome};

/// Attempts for a contended upsert before the individual event fails.
const UPSERT_ATTEMPTS: u32 = 3;
const UPSERT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Postgres-backed repository. Same-identity upserts serialize on a row
/// lock; every operation is a single transaction.
#[derive(Clone)]
pub struct PgEventRepository {
    pool: PgPool,
}

#[derive(Debug, sqlx::FromRow)]
struct EventRow {
    id: Uuid,
    source: String,
    ride_id: String,
    name: String,
    description: Option<String>,
    date_start: NaiveDate,
    date_end: NaiveDate,
    location: Option<String>,
    city: Option<String>,
    state: Option<String>,
    country: Option<String>,
    organization: Option<String>,
    distances: serde_json::Value,
    ride_manager: Option<String>,
    manager_email: Option<String>,
    manager_phone: Option<String>,
    website_url: Option<String>,
    flyer_url: Option<String>,
    map_link: Option<String>,
    control_judges: serde_json::Value,
    is_multi_day_event: bool,
    is_pioneer_ride: bool,
    ride_days: i32,
    has_intro_ride: bool,
    is_canceled: bool,
    latitude: Option<f64>,
    longitude: Option<f64>,
    geocoding_attempted: bool,
    last_website_check_at: Option<DateTime<Utc>>,
    event_details: serde_json::Value,
    notes: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl EventRow {
    fn into_event(self) -> Result<Event, RideWatchError> {
        let distances: Vec<Distance> = serde_json::from_value(self.distances)
            .map_err(|e| RideWatchError::Repository(format!("distances column: {e}")))?;
        let control_judges: Vec<ControlJudge> = serde_json::from_value(self.control_judges)
            .map_err(|e| RideWatchError::Repository(format!("control_judges column: {e}")))?;
        let event_details = match self.event_details {
            serde_json::Value::Object(map) => map,
            serde_json::Value::Null => serde_json::Map::new(),
            other => {
                return Err(RideWatchError::Repository(format!(
                    "event_details column is not an object: {other}"
                )))
            }
        };
        Ok(Event {
            id: self.id,
            source: self.source,
            ride_id: self.ride_id,
            name: self.name,
            description: self.description,
            date_start: self.date_start,
            date_end: self.date_end,
            location: self.location,
            city: self.city,
            state: self.state,
            country: self.country,
            organization: self.organization,
            distances,
            ride_manager: self.ride_manager,
            manager_email: self.manager_email,
            manager_phone: self.manager_phone,
            website_url: self.website_url,
            flyer_url: self.flyer_url,
            map_link: self.map_link,
            control_judges,
            is_multi_day_event: self.is_multi_day_event,
            is_pioneer_ride: self.is_pioneer_ride,
            ride_days: self.ride_days as u32,
            has_intro_ride: self.has_intro_ride,
            is_canceled: self.is_canceled,
            latitude: self.latitude,
            longitude: self.longitude,
            geocoding_attempted: self.geocoding_attempted,
            last_website_check_at: self.last_website_check_at,
            event_details,
            notes: self.notes,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct RunReportRow {
    run_id: Uuid,
    job: String,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    outcome: String,
    counts: serde_json::Value,
    errors: serde_json::Value,
}

impl RunReportRow {
    fn into_report(self) -> Result<RunReport, RideWatchError> {
        let counts: RunCounts = serde_json::from_value(self.counts)
            .map_err(|e| RideWatchError::Repository(format!("counts column: {e}")))?;
        let errors: Vec<RunError> = serde_json::from_value(self.errors)
            .map_err(|e| RideWatchError::Repository(format!("errors column: {e}")))?;
        let outcome: RunOutcome = self
            .outcome
            .parse()
            .map_err(RideWatchError::Repository)?;
        Ok(RunReport {
            run_id: self.run_id,
            job: self.job,
            started_at: self.started_at,
            ended_at: self.ended_at,
            outcome,
            counts,
            errors,
        })
    }
}

impl PgEventRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run the embedded SQL migrations.
    pub async fn migrate(&self) -> Result<(), RideWatchError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| RideWatchError::Repository(e.to_string()))?;
        Ok(())
    }

    async fn upsert_once(&self, event: &Event) -> Result<UpsertOutcome, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query_as::<_, EventRow>(
            r#"
            SELECT * FROM events
            WHERE source = $1 AND ride_id = $2
            FOR UPDATE
            "#,
        )
        .bind(&event.source)
        .bind(&event.ride_id)
        .fetch_optional(&mut *tx)
        .await?;

        let outcome = match existing {
            None => {
                insert_event(&mut tx, event).await?;
                UpsertOutcome::Inserted
            }
            Some(row) => {
                let stored = row
                    .into_event()
                    .map_err(|e| sqlx::Error::Decode(e.to_string().into()))?;
                let merged = reconcile(&stored, event);
                if !merged.changed {
                    debug!(
                        source = %event.source,
                        ride_id = %event.ride_id,
                        "upsert produced no effective change"
                    );
                    UpsertOutcome::Unchanged
                } else {
                    update_event(&mut tx, &merged.event).await?;
                    UpsertOutcome::Updated
                }
            }
        };

        tx.commit().await?;
        Ok(outcome)
    }
}

async fn insert_event(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    event: &Event,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO events
            (id, source, ride_id, name, description, date_start, date_end,
             location, city, state, country, organization, distances,
             ride_manager, manager_email, manager_phone,
             website_url, flyer_url, map_link, control_judges,
             is_multi_day_event, is_pioneer_ride, ride_days, has_intro_ride,
             is_canceled, latitude, longitude, geocoding_attempted,
             last_website_check_at, event_details, notes, created_at, updated_at)
        VALUES
            ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
             $16, $17, $18, $19, $20, $21, $22, $23, $24, $25, $26, $27, $28,
             $29, $30, $31, now(), now())
        "#,
    )
    .bind(event.id)
    .bind(&event.source)
    .bind(&event.ride_id)
    .bind(&event.name)
    .bind(&event.description)
    .bind(event.date_start)
    .bind(event.date_end)
    .bind(&event.location)
    .bind(&event.city)
    .bind(&event.state)
    .bind(&event.country)
    .bind(&event.organization)
    .bind(serde_json::to_value(&event.distances).unwrap_or_default())
    .bind(&event.ride_manager)
    .bind(&event.manager_email)
    .bind(&event.manager_phone)
    .bind(&event.website_url)
    .bind(&event.flyer_url)
    .bind(&event.map_link)
    .bind(serde_json::to_value(&event.control_judges).unwrap_or_default())
    .bind(event.is_multi_day_event)
    .bind(event.is_pioneer_ride)
    .bind(event.ride_days as i32)
    .bind(event.has_intro_ride)
    .bind(event.is_canceled)
    .bind(event.latitude)
    .bind(event.longitude)
    .bind(event.geocoding_attempted)
    .bind(event.last_website_check_at)
    .bind(serde_json::Value::Object(event.event_details.clone()))
    .bind(&event.notes)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn update_event(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    event: &Event,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE events SET
            name = $2, description = $3, date_start = $4, date_end = $5,
            location = $6, city = $7, state = $8, country = $9,
            organization = $10, distances = $11, ride_manager = $12,
            manager_email = $13, manager_phone = $14, website_url = $15,
            flyer_url = $16, map_link = $17, control_judges = $18,
            is_multi_day_event = $19, is_pioneer_ride = $20, ride_days = $21,
            has_intro_ride = $22, is_canceled = $23, latitude = $24,
            longitude = $25, geocoding_attempted = $26, event_details = $27,
            notes = $28, updated_at = now()
        WHERE id = $1
        "#,
    )
    .bind(event.id)
    .bind(&event.name)
    .bind(&event.description)
    .bind(event.date_start)
    .bind(event.date_end)
    .bind(&event.location)
    .bind(&event.city)
    .bind(&event.state)
    .bind(&event.country)
    .bind(&event.organization)
    .bind(serde_json::to_value(&event.distances).unwrap_or_default())
    .bind(&event.ride_manager)
    .bind(&event.manager_email)
    .bind(&event.manager_phone)
    .bind(&event.website_url)
    .bind(&event.flyer_url)
    .bind(&event.map_link)
    .bind(serde_json::to_value(&event.control_judges).unwrap_or_default())
    .bind(event.is_multi_day_event)
    .bind(event.is_pioneer_ride)
    .bind(event.ride_days as i32)
    .bind(event.has_intro_ride)
    .bind(event.is_canceled)
    .bind(event.latitude)
    .bind(event.longitude)
    .bind(event.geocoding_attempted)
    .bind(serde_json::Value::Object(event.event_details.clone()))
    .bind(&event.notes)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[async_trait]
impl EventRepository for PgEventRepository {
    async fn upsert(&self, event: &Event) -> Result<UpsertOutcome, RideWatchError> {
        let mut last_error = None;
        for attempt in 0..UPSERT_ATTEMPTS {
            match self.upsert_once(event).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) => {
                    warn!(
                        source = %event.source,
                        ride_id = %event.ride_id,
                        attempt,
                        error = %e,
                        "upsert attempt failed"
                    );
                    last_error = Some(e);
                    if attempt + 1 < UPSERT_ATTEMPTS {
                        tokio::time::sleep(UPSERT_RETRY_DELAY).await;
                    }
                }
            }
        }
        Err(RideWatchError::Repository(
            last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "upsert failed".to_string()),
        ))
    }

    async fn get(&self, source: &str, ride_id: &str) -> Result<Option<Event>, RideWatchError> {
        let row = sqlx::query_as::<_, EventRow>(
            "SELECT * FROM events WHERE source = $1 AND ride_id = $2",
        )
        .bind(source)
        .bind(ride_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RideWatchError::Repository(e.to_string()))?;
        row.map(EventRow::into_event).transpose()
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Event>, RideWatchError> {
        let row = sqlx::query_as::<_, EventRow>("SELECT * FROM events WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RideWatchError::Repository(e.to_string()))?;
        row.map(EventRow::into_event).transpose()
    }

    async fn list_for_geocoding(&self, limit: Option<u32>) -> Result<Vec<Event>, RideWatchError> {
        let rows = sqlx::query_as::<_, EventRow>(
            r#"
            SELECT * FROM events
            WHERE geocoding_attempted = false
            ORDER BY date_start ASC
            LIMIT $1
            "#,
        )
        .bind(limit.map(|l| l as i64).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RideWatchError::Repository(e.to_string()))?;
        rows.into_iter().map(EventRow::into_event).collect()
    }

    async fn list_for_detail_enrichment(
        &self,
        now: DateTime<Utc>,
        limit: Option<u32>,
    ) -> Result<Vec<Event>, RideWatchError> {
        // Prefilter: has a website, not long past. The worker applies the
        // precise tier cadence on top.
        let rows = sqlx::query_as::<_, EventRow>(
            r#"
            SELECT * FROM events
            WHERE website_url IS NOT NULL
              AND date_end + 30 >= $1::date
            ORDER BY last_website_check_at ASC NULLS FIRST, date_start ASC
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit.map(|l| l as i64).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RideWatchError::Repository(e.to_string()))?;
        rows.into_iter().map(EventRow::into_event).collect()
    }

    async fn list_by_location(
        &self,
        lat: f64,
        lng: f64,
        radius_mi: f64,
    ) -> Result<Vec<Event>, RideWatchError> {
        let rows = sqlx::query_as::<_, EventRow>(
            "SELECT * FROM events WHERE latitude IS NOT NULL AND longitude IS NOT NULL",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RideWatchError::Repository(e.to_string()))?;

        let mut events = Vec::new();
        for row in rows {
            let event = row.into_event()?;
            if let (Some(elat), Some(elng)) = (event.latitude, event.longitude) {
                if haversine_mi(lat, lng, elat, elng) <= radius_mi {
                    events.push(event);
                }
            }
        }
        Ok(events)
    }

    async fn mark_geocoded(
        &self,
        id: Uuid,
        lat: Option<f64>,
        lng: Option<f64>,
    ) -> Result<(), RideWatchError> {
        sqlx::query(
            r#"
            UPDATE events SET
                geocoding_attempted = true,
                latitude = $2,
                longitude = $3,
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(lat)
        .bind(lng)
        .execute(&self.pool)
        .await
        .map_err(|e| RideWatchError::Repository(e.to_string()))?;
        Ok(())
    }

    async fn reset_geocoding(&self, id: Uuid) -> Result<(), RideWatchError> {
        sqlx::query(
            r#"
            UPDATE events SET
                geocoding_attempted = false,
                latitude = NULL,
                longitude = NULL,
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| RideWatchError::Repository(e.to_string()))?;
        Ok(())
    }

    async fn update_details(
        &self,
        id: Uuid,
        patch: &serde_json::Map<String, serde_json::Value>,
        checked_at: DateTime<Utc>,
    ) -> Result<(), RideWatchError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| RideWatchError::Repository(e.to_string()))?;

        let row = sqlx::query_as::<_, EventRow>("SELECT * FROM events WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| RideWatchError::Repository(e.to_string()))?;

        let Some(row) = row else {
            return Err(RideWatchError::Repository(format!("no event with id {id}")));
        };

        let mut event = row.into_event()?;
        crate::reconcile::deep_merge(
            &mut event.event_details,
            patch,
            crate::reconcile::MergePrecedence::PatchWins,
        );

        sqlx::query(
            r#"
            UPDATE events SET
                event_details = $2,
                last_website_check_at = $3,
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(serde_json::Value::Object(event.event_details))
        .bind(checked_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| RideWatchError::Repository(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| RideWatchError::Repository(e.to_string()))?;
        Ok(())
    }

    async fn insert_run_report(&self, report: &RunReport) -> Result<(), RideWatchError> {
        sqlx::query(
            r#"
            INSERT INTO run_reports (run_id, job, started_at, ended_at, outcome, counts, errors)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(report.run_id)
        .bind(&report.job)
        .bind(report.started_at)
        .bind(report.ended_at)
        .bind(report.outcome.to_string())
        .bind(serde_json::to_value(report.counts).unwrap_or_default())
        .bind(serde_json::to_value(&report.errors).unwrap_or_default())
        .execute(&self.pool)
        .await
        .map_err(|e| RideWatchError::Repository(e.to_string()))?;
        Ok(())
    }

    async fn recent_run_reports(
        &self,
        job: &str,
        limit: u32,
    ) -> Result<Vec<RunReport>, RideWatchError> {
        let rows = sqlx::query_as::<_, RunReportRow>(
            r#"
            SELECT run_id, job, started_at, ended_at, outcome, counts, errors
            FROM run_reports
            WHERE job = $1
            ORDER BY started_at DESC
            LIMIT $2
            "#,
        )
        .bind(job)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RideWatchError::Repository(e.to_string()))?;
        rows.into_iter().map(RunReportRow::into_report).collect()
    }
}
