//! # DXA Run
//!
//! REST surface over [`dxa_core::ClinicService`].
//!
//! Handles:
//! - HTTP endpoints with axum
//! - OpenAPI/Swagger documentation
//! - REST-specific concerns (JSON bodies, status codes, CORS)
//!
//! Handlers translate between JSON and core types and map [`ClinicError`] onto status codes;
//! all clinic rules live in `dxa-core`.

use axum::{
    Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
};
use chrono::NaiveDate;
use dxa_core::calculator::MetricsBundle;
use dxa_core::schedule::ScheduledVisit;
use dxa_core::{
    ClinicError, ClinicService, ContactMethod, ContactRecord, ContinuationStats, Eligibility,
    FileStore, FollowUpEntry, Gender, ImportRow, ImportSummary, MeasurementRecord, NewMeasurement,
    NewPatient, NonEmptyText, OverdueReport, PatientRecord, RecordId, Vertebra, VertebralResult,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use utoipa::{IntoParams, OpenApi, ToSchema};
use utoipa_swagger_ui::SwaggerUi;

/// Application state shared across REST handlers.
#[derive(Clone)]
pub struct AppState {
    pub clinic: Arc<ClinicService<FileStore>>,
}

type ApiError = (StatusCode, String);
type ApiResult<T> = Result<Json<T>, ApiError>;

fn api_error(err: ClinicError) -> ApiError {
    let status = match &err {
        ClinicError::InvalidInput(_)
        | ClinicError::Text(_)
        | ClinicError::Id(_)
        | ClinicError::Gender(_)
        | ClinicError::YamlDeserialization { .. } => StatusCode::BAD_REQUEST,
        ClinicError::PatientNotFound(_) | ClinicError::ScheduleNotFound(_) => StatusCode::NOT_FOUND,
        ClinicError::DuplicatePatientCode(_) | ClinicError::ScheduleAlreadyCompleted(_) => {
            StatusCode::CONFLICT
        }
        _ => {
            tracing::error!("request failed: {:?}", err);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Internal error".into());
        }
    };
    (status, err.to_string())
}

fn bad_request(message: impl Into<String>) -> ApiError {
    (StatusCode::BAD_REQUEST, message.into())
}

fn parse_gender(raw: &str) -> Result<Gender, ApiError> {
    raw.parse::<Gender>().map_err(|e| bad_request(e.to_string()))
}

fn parse_id(raw: &str) -> Result<RecordId, ApiError> {
    RecordId::parse(raw).map_err(|e| bad_request(e.to_string()))
}

fn parse_vertebrae(readings: &[VertebraReading]) -> Result<Vec<(Vertebra, f64)>, ApiError> {
    readings
        .iter()
        .map(|r| {
            r.vertebra
                .parse::<Vertebra>()
                .map(|v| (v, r.bmd))
                .map_err(|e| bad_request(e.to_string()))
        })
        .collect()
}

fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

// ============================================================================
// WIRE TYPES
// ============================================================================

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthRes {
    pub ok: bool,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MetricsReq {
    /// `female`, `male`, `f`, `m`, `女性` or `男性`
    pub gender: String,
    #[serde(default)]
    pub femur_bmd: f64,
    #[serde(default)]
    pub lumbar_bmd: f64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MetricsRes {
    #[schema(value_type = Object)]
    pub metrics: MetricsBundle,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct VertebraReading {
    /// `L1` to `L4`
    pub vertebra: String,
    pub bmd: f64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct VertebralReq {
    pub gender: String,
    pub vertebrae: Vec<VertebraReading>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct VertebralRes {
    /// Null when no vertebra has a positive reading.
    #[schema(value_type = Option<Object>)]
    pub result: Option<VertebralResult>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreatePatientReq {
    pub patient_code: String,
    pub name: String,
    #[serde(default)]
    pub name_kana: Option<String>,
    pub gender: String,
    pub birth_date: NaiveDate,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PatientRes {
    #[schema(value_type = Object)]
    pub patient: PatientRecord,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ListPatientsRes {
    #[schema(value_type = Vec<Object>)]
    pub patients: Vec<PatientRecord>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AddMeasurementReq {
    pub measurement_date: NaiveDate,
    #[serde(default)]
    pub femur_bmd: f64,
    /// Direct lumbar reading. Ignored when `vertebrae` is given.
    #[serde(default)]
    pub lumbar_bmd: Option<f64>,
    #[serde(default)]
    pub vertebrae: Vec<VertebraReading>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AddMeasurementRes {
    pub measurement_id: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HistoryRes {
    #[schema(value_type = Vec<Object>)]
    pub measurements: Vec<MeasurementRecord>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct FollowUpsRes {
    #[schema(value_type = Vec<Object>)]
    pub follow_ups: Vec<FollowUpEntry>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct FollowUpRes {
    #[schema(value_type = Object)]
    pub follow_up: FollowUpEntry,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OverdueRes {
    #[schema(value_type = Object)]
    pub report: OverdueReport,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct EligibilityRes {
    #[schema(value_type = Object)]
    pub eligibility: Eligibility,
}

#[derive(Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct CompleteReq {
    /// Completion date; defaults to today.
    #[serde(default)]
    pub today: Option<NaiveDate>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ContactReq {
    /// Defaults to today.
    #[serde(default)]
    pub date: Option<NaiveDate>,
    /// `phone`, `letter`, `email` or `in_person`
    pub method: String,
    pub outcome: String,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MonthlyScheduleRes {
    #[schema(value_type = Vec<Object>)]
    pub visits: Vec<ScheduledVisit>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StatsRes {
    #[schema(value_type = Object)]
    pub stats: ContinuationStats,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SettingRes {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UpdateSettingReq {
    pub value: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ImportReq {
    #[schema(value_type = Vec<Object>)]
    pub rows: Vec<ImportRow>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ImportRes {
    #[schema(value_type = Object)]
    pub summary: ImportSummary,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct TodayQuery {
    /// Reference date (YYYY-MM-DD); defaults to today.
    pub today: Option<NaiveDate>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct EligibilityQuery {
    /// Planned measurement date (YYYY-MM-DD); defaults to today.
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct SettingQuery {
    /// Value returned when the key is not set.
    pub default: Option<String>,
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health,
        calculate_metrics,
        calculate_vertebral,
        list_patients,
        create_patient,
        get_patient,
        list_measurements,
        add_measurement,
        list_follow_ups,
        check_eligibility,
        overdue,
        complete_follow_up,
        record_contact,
        monthly_schedule,
        continuation_stats,
        get_setting,
        update_setting,
        import_measurements,
    ),
    components(schemas(
        HealthRes,
        MetricsReq,
        MetricsRes,
        VertebraReading,
        VertebralReq,
        VertebralRes,
        CreatePatientReq,
        PatientRes,
        ListPatientsRes,
        AddMeasurementReq,
        AddMeasurementRes,
        HistoryRes,
        FollowUpsRes,
        FollowUpRes,
        OverdueRes,
        EligibilityRes,
        CompleteReq,
        ContactReq,
        MonthlyScheduleRes,
        StatsRes,
        SettingRes,
        UpdateSettingReq,
        ImportReq,
        ImportRes,
    ))
)]
pub struct ApiDoc;

/// Builds the REST router with Swagger UI and permissive CORS.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", post(calculate_metrics))
        .route("/metrics/vertebral", post(calculate_vertebral))
        .route("/patients", get(list_patients).post(create_patient))
        .route("/patients/:id", get(get_patient))
        .route(
            "/patients/:id/measurements",
            get(list_measurements).post(add_measurement),
        )
        .route("/patients/:id/follow-ups", get(list_follow_ups))
        .route("/patients/:id/eligibility", get(check_eligibility))
        .route("/overdue", get(overdue))
        .route("/follow-ups/:id/complete", post(complete_follow_up))
        .route("/follow-ups/:id/contact", post(record_contact))
        .route("/schedule/:year/:month", get(monthly_schedule))
        .route("/stats/:year", get(continuation_stats))
        .route("/settings/:key", get(get_setting).put(update_setting))
        .route("/import", post(import_measurements))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ============================================================================
// HANDLERS
// ============================================================================

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Health check response", body = HealthRes)
    )
)]
/// Health check endpoint for monitoring and load balancers.
async fn health(State(_state): State<AppState>) -> Json<HealthRes> {
    Json(HealthRes {
        ok: true,
        message: "DXA REST API is alive".into(),
    })
}

#[utoipa::path(
    post,
    path = "/metrics",
    request_body = MetricsReq,
    responses(
        (status = 200, description = "Femur and lumbar metrics", body = MetricsRes),
        (status = 400, description = "Unrecognised gender")
    )
)]
/// YAM, T-score and diagnosis for femoral-neck and lumbar readings. A reading of zero or
/// below counts as not measured.
async fn calculate_metrics(
    State(state): State<AppState>,
    Json(req): Json<MetricsReq>,
) -> ApiResult<MetricsRes> {
    let gender = parse_gender(&req.gender)?;
    let metrics = state
        .clinic
        .calculate_all_metrics(req.femur_bmd, req.lumbar_bmd, gender);
    Ok(Json(MetricsRes { metrics }))
}

#[utoipa::path(
    post,
    path = "/metrics/vertebral",
    request_body = VertebralReq,
    responses(
        (status = 200, description = "Per-vertebra analysis", body = VertebralRes),
        (status = 400, description = "Unrecognised gender, or unknown or repeated vertebra")
    )
)]
async fn calculate_vertebral(
    State(state): State<AppState>,
    Json(req): Json<VertebralReq>,
) -> ApiResult<VertebralRes> {
    let gender = parse_gender(&req.gender)?;
    let readings = parse_vertebrae(&req.vertebrae)?;
    let result = state
        .clinic
        .calculate_vertebral_metrics(&readings, gender)
        .map_err(api_error)?;
    Ok(Json(VertebralRes { result }))
}

#[utoipa::path(
    get,
    path = "/patients",
    responses(
        (status = 200, description = "List of patients", body = ListPatientsRes),
        (status = 500, description = "Internal server error")
    )
)]
async fn list_patients(State(state): State<AppState>) -> ApiResult<ListPatientsRes> {
    let patients = state.clinic.list_patients().map_err(api_error)?;
    Ok(Json(ListPatientsRes { patients }))
}

#[utoipa::path(
    post,
    path = "/patients",
    request_body = CreatePatientReq,
    responses(
        (status = 201, description = "Patient registered", body = PatientRes),
        (status = 400, description = "Bad request"),
        (status = 409, description = "Patient code already registered")
    )
)]
async fn create_patient(
    State(state): State<AppState>,
    Json(req): Json<CreatePatientReq>,
) -> Result<(StatusCode, Json<PatientRes>), ApiError> {
    let name = NonEmptyText::new(&req.name).map_err(|e| bad_request(e.to_string()))?;
    let patient = state
        .clinic
        .register_patient(NewPatient {
            patient_code: req.patient_code,
            name,
            name_kana: req.name_kana,
            gender: parse_gender(&req.gender)?,
            birth_date: req.birth_date,
        })
        .map_err(api_error)?;
    Ok((StatusCode::CREATED, Json(PatientRes { patient })))
}

#[utoipa::path(
    get,
    path = "/patients/{id}",
    params(("id" = String, Path, description = "Patient identifier")),
    responses(
        (status = 200, description = "Patient record", body = PatientRes),
        (status = 404, description = "Patient not found")
    )
)]
async fn get_patient(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<PatientRes> {
    let patient = state
        .clinic
        .get_patient(parse_id(&id)?)
        .map_err(api_error)?;
    Ok(Json(PatientRes { patient }))
}

#[utoipa::path(
    get,
    path = "/patients/{id}/measurements",
    params(("id" = String, Path, description = "Patient identifier")),
    responses(
        (status = 200, description = "Measurement history, newest first", body = HistoryRes),
        (status = 404, description = "Patient not found")
    )
)]
async fn list_measurements(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<HistoryRes> {
    let measurements = state
        .clinic
        .measurement_history(parse_id(&id)?)
        .map_err(api_error)?;
    Ok(Json(HistoryRes { measurements }))
}

#[utoipa::path(
    post,
    path = "/patients/{id}/measurements",
    params(("id" = String, Path, description = "Patient identifier")),
    request_body = AddMeasurementReq,
    responses(
        (status = 201, description = "Measurement saved and schedule updated", body = AddMeasurementRes),
        (status = 400, description = "No positive reading or malformed input"),
        (status = 404, description = "Patient not found")
    )
)]
/// Saves a measurement. Pending follow-ups within three days of the measurement date are
/// completed and the next follow-up is scheduled.
async fn add_measurement(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<AddMeasurementReq>,
) -> Result<(StatusCode, Json<AddMeasurementRes>), ApiError> {
    let patient_id = parse_id(&id)?;
    let mut input =
        NewMeasurement::new(patient_id, req.measurement_date).with_femur(req.femur_bmd);
    if !req.vertebrae.is_empty() {
        input = input.with_vertebrae(parse_vertebrae(&req.vertebrae)?);
    } else if let Some(bmd) = req.lumbar_bmd {
        input = input.with_lumbar(bmd);
    }
    if let Some(notes) = req.notes {
        input = input.with_notes(notes);
    }

    let measurement_id = state.clinic.add_measurement(input).map_err(api_error)?;
    Ok((
        StatusCode::CREATED,
        Json(AddMeasurementRes {
            measurement_id: measurement_id.to_string(),
        }),
    ))
}

#[utoipa::path(
    get,
    path = "/patients/{id}/follow-ups",
    params(("id" = String, Path, description = "Patient identifier")),
    responses(
        (status = 200, description = "Follow-up entries", body = FollowUpsRes),
        (status = 404, description = "Patient not found")
    )
)]
async fn list_follow_ups(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<FollowUpsRes> {
    let patient_id = parse_id(&id)?;
    state.clinic.get_patient(patient_id).map_err(api_error)?;
    let follow_ups = state.clinic.follow_ups(patient_id).map_err(api_error)?;
    Ok(Json(FollowUpsRes { follow_ups }))
}

#[utoipa::path(
    get,
    path = "/patients/{id}/eligibility",
    params(("id" = String, Path, description = "Patient identifier"), EligibilityQuery),
    responses(
        (status = 200, description = "Insurance eligibility", body = EligibilityRes),
        (status = 404, description = "Patient not found")
    )
)]
async fn check_eligibility(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<EligibilityQuery>,
) -> ApiResult<EligibilityRes> {
    let eligibility = state
        .clinic
        .check_insurance_eligibility(parse_id(&id)?, query.date.unwrap_or_else(today))
        .map_err(api_error)?;
    Ok(Json(EligibilityRes { eligibility }))
}

#[utoipa::path(
    get,
    path = "/overdue",
    params(TodayQuery),
    responses(
        (status = 200, description = "Overdue follow-ups by severity", body = OverdueRes)
    )
)]
async fn overdue(
    State(state): State<AppState>,
    Query(query): Query<TodayQuery>,
) -> ApiResult<OverdueRes> {
    let report = state
        .clinic
        .get_overdue_patients(query.today.unwrap_or_else(today))
        .map_err(api_error)?;
    Ok(Json(OverdueRes { report }))
}

#[utoipa::path(
    post,
    path = "/follow-ups/{id}/complete",
    params(("id" = String, Path, description = "Follow-up entry identifier")),
    request_body = CompleteReq,
    responses(
        (status = 200, description = "Entry completed", body = FollowUpRes),
        (status = 404, description = "Entry not found"),
        (status = 409, description = "Entry already completed")
    )
)]
async fn complete_follow_up(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<CompleteReq>,
) -> ApiResult<FollowUpRes> {
    let follow_up = state
        .clinic
        .complete_follow_up(parse_id(&id)?, req.today.unwrap_or_else(today))
        .map_err(api_error)?;
    Ok(Json(FollowUpRes { follow_up }))
}

#[utoipa::path(
    post,
    path = "/follow-ups/{id}/contact",
    params(("id" = String, Path, description = "Follow-up entry identifier")),
    request_body = ContactReq,
    responses(
        (status = 200, description = "Contact recorded", body = FollowUpRes),
        (status = 400, description = "Unknown contact method"),
        (status = 404, description = "Entry not found"),
        (status = 409, description = "Entry already completed")
    )
)]
async fn record_contact(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ContactReq>,
) -> ApiResult<FollowUpRes> {
    let method = req.method.parse::<ContactMethod>().map_err(api_error)?;
    let follow_up = state
        .clinic
        .record_contact(
            parse_id(&id)?,
            ContactRecord {
                date: req.date.unwrap_or_else(today),
                method,
                outcome: req.outcome,
                notes: req.notes.filter(|n| !n.trim().is_empty()),
            },
        )
        .map_err(api_error)?;
    Ok(Json(FollowUpRes { follow_up }))
}

#[utoipa::path(
    get,
    path = "/schedule/{year}/{month}",
    params(
        ("year" = i32, Path, description = "Calendar year"),
        ("month" = u32, Path, description = "Calendar month, 1-12")
    ),
    responses(
        (status = 200, description = "Entries scheduled in the month", body = MonthlyScheduleRes),
        (status = 400, description = "Invalid month")
    )
)]
async fn monthly_schedule(
    State(state): State<AppState>,
    Path((year, month)): Path<(i32, u32)>,
) -> ApiResult<MonthlyScheduleRes> {
    let visits = state
        .clinic
        .monthly_schedule(year, month)
        .map_err(api_error)?;
    Ok(Json(MonthlyScheduleRes { visits }))
}

#[utoipa::path(
    get,
    path = "/stats/{year}",
    params(("year" = i32, Path, description = "Calendar year"), TodayQuery),
    responses(
        (status = 200, description = "Continuation statistics", body = StatsRes)
    )
)]
async fn continuation_stats(
    State(state): State<AppState>,
    Path(year): Path<i32>,
    Query(query): Query<TodayQuery>,
) -> ApiResult<StatsRes> {
    let stats = state
        .clinic
        .continuation_stats(year, query.today.unwrap_or_else(today))
        .map_err(api_error)?;
    Ok(Json(StatsRes { stats }))
}

#[utoipa::path(
    get,
    path = "/settings/{key}",
    params(("key" = String, Path, description = "Setting key"), SettingQuery),
    responses(
        (status = 200, description = "Stored value or the supplied default", body = SettingRes)
    )
)]
async fn get_setting(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(query): Query<SettingQuery>,
) -> ApiResult<SettingRes> {
    let default = query.default.unwrap_or_default();
    let value = state
        .clinic
        .get_system_setting(&key, &default)
        .map_err(api_error)?;
    Ok(Json(SettingRes { key, value }))
}

#[utoipa::path(
    put,
    path = "/settings/{key}",
    params(("key" = String, Path, description = "Setting key")),
    request_body = UpdateSettingReq,
    responses(
        (status = 200, description = "Setting stored", body = SettingRes),
        (status = 400, description = "Value rejected for this key")
    )
)]
async fn update_setting(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(req): Json<UpdateSettingReq>,
) -> ApiResult<SettingRes> {
    state
        .clinic
        .update_system_setting(&key, &req.value)
        .map_err(api_error)?;
    Ok(Json(SettingRes {
        key,
        value: req.value.trim().to_string(),
    }))
}

#[utoipa::path(
    post,
    path = "/import",
    request_body = ImportReq,
    responses(
        (status = 200, description = "Imported and skipped rows", body = ImportRes),
        (status = 500, description = "Storage failure part-way through")
    )
)]
async fn import_measurements(
    State(state): State<AppState>,
    Json(req): Json<ImportReq>,
) -> ApiResult<ImportRes> {
    let summary = state
        .clinic
        .import_measurements(&req.rows)
        .map_err(api_error)?;
    Ok(Json(ImportRes { summary }))
}
