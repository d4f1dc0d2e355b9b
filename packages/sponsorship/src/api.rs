//! Plain-data facade for the web and admin layers.
//!
//! Requests are strings and integers, responses are `ApiResponse<T>`. No
//! error escapes as a `Result`; every outcome is a response with a stable
//! `error_code` the caller can branch on.

use serde::{Deserialize, Serialize};
use tracing::error;

use crate::common::{ChildId, OperationContext, SponsorshipError, SponsorshipResult};
use crate::domains::children::{AvailabilityLedger, FamilySummary};
use crate::domains::reservations::{
    CleanupSummary, HoldFlow, HoldPolicy, HoldWindow, NewReservation, Reservation,
    ReservationReceipt, ReservationService, ReservationType, ReservationView, SponsorContact,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    /// Display ids that blocked a claim.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unavailable: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            error_code: None,
            unavailable: Vec::new(),
            data: Some(data),
        }
    }

    pub fn from_error(err: &SponsorshipError) -> Self {
        if let SponsorshipError::StorageFailure(cause) = err {
            error!(error = %cause, "Request failed on storage");
        }
        let unavailable = match err {
            SponsorshipError::Unavailable { display_ids, .. } => display_ids.clone(),
            _ => Vec::new(),
        };
        Self {
            success: false,
            message: err.public_message(),
            error_code: Some(err.code().to_string()),
            unavailable,
            data: None,
        }
    }

    fn from_result(result: SponsorshipResult<T>, message: &str) -> Self {
        match result {
            Ok(data) => Self::ok(message, data),
            Err(err) => Self::from_error(&err),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateReservationRequest {
    pub sponsor_name: String,
    pub sponsor_email: String,
    #[serde(default)]
    pub sponsor_phone: Option<String>,
    #[serde(default)]
    pub sponsor_address: Option<String>,
    pub child_ids: Vec<i64>,
    /// `individual`, `sibling` or `family`; defaults to individual.
    #[serde(default)]
    pub reservation_type: Option<String>,
    /// `reservation` (default) or `selection`; picks the default hold.
    #[serde(default)]
    pub flow: Option<String>,
    /// Explicit hold in hours; overrides the flow default.
    #[serde(default)]
    pub hold_hours: Option<i64>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Clone)]
pub struct SponsorshipApi {
    service: ReservationService,
    ledger: AvailabilityLedger,
    holds: HoldPolicy,
}

impl SponsorshipApi {
    /// Default holds come from the service's settings.
    pub fn new(service: ReservationService) -> Self {
        let ledger = AvailabilityLedger::new(service.deps().clone());
        let holds = service.deps().settings.holds;
        Self {
            service,
            ledger,
            holds,
        }
    }

    pub async fn create_reservation(
        &self,
        ctx: &OperationContext,
        request: CreateReservationRequest,
    ) -> ApiResponse<ReservationReceipt> {
        let result = match self.to_new_reservation(request) {
            Ok(new) => self.service.create_reservation(ctx, new).await,
            Err(err) => Err(err),
        };
        ApiResponse::from_result(result, "Children reserved")
    }

    pub async fn get_reservation(&self, token: &str) -> ApiResponse<ReservationView> {
        ApiResponse::from_result(self.service.get_reservation(token).await, "Reservation found")
    }

    pub async fn confirm_reservation(
        &self,
        ctx: &OperationContext,
        token: &str,
    ) -> ApiResponse<Reservation> {
        ApiResponse::from_result(
            self.service.confirm_reservation(ctx, token).await,
            "Sponsorship confirmed",
        )
    }

    pub async fn cancel_reservation(
        &self,
        ctx: &OperationContext,
        token: &str,
        reason: Option<&str>,
    ) -> ApiResponse<Reservation> {
        ApiResponse::from_result(
            self.service.cancel_reservation(ctx, token, reason).await,
            "Reservation cancelled",
        )
    }

    pub async fn cleanup_expired(&self, ctx: &OperationContext) -> ApiResponse<CleanupSummary> {
        ApiResponse::from_result(
            self.service.cleanup_expired(ctx).await,
            "Expired reservations released",
        )
    }

    pub async fn find_by_sponsor_email(&self, email: &str) -> ApiResponse<Vec<ReservationView>> {
        ApiResponse::from_result(
            self.service.find_by_sponsor_email(email).await,
            "Reservations found",
        )
    }

    /// Families a sponsor can currently be offered.
    pub async fn available_families(&self) -> ApiResponse<Vec<FamilySummary>> {
        ApiResponse::from_result(self.ledger.offerable_families().await, "Available families")
    }

    fn to_new_reservation(&self, request: CreateReservationRequest) -> SponsorshipResult<NewReservation> {
        let reservation_type = match request.reservation_type.as_deref() {
            None => ReservationType::Individual,
            Some(raw) => raw
                .parse::<ReservationType>()
                .map_err(SponsorshipError::Validation)?,
        };

        let flow = match request.flow.as_deref().map(str::trim) {
            None | Some("") | Some("reservation") => HoldFlow::Reservation,
            Some("selection") => HoldFlow::Selection,
            Some(other) => {
                return Err(SponsorshipError::validation(format!("unknown flow '{}'", other)))
            }
        };
        let hold = match request.hold_hours {
            Some(hours) => HoldWindow::hours(hours)?,
            None => self.holds.window_for(flow),
        };

        let mut sponsor = SponsorContact::new(request.sponsor_name, request.sponsor_email);
        sponsor.phone = request.sponsor_phone;
        sponsor.address = request.sponsor_address;

        Ok(NewReservation {
            sponsor,
            child_ids: request.child_ids.into_iter().map(ChildId::new).collect(),
            reservation_type,
            hold,
            notes: request.notes,
        })
    }
}
