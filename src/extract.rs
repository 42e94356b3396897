use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRequest, Request},
    Json,
};
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::error::AppError;

/// Request body that checks itself and yields the checked form.
pub trait Validate: Sized {
    type Output;

    fn validate(self) -> Result<Self::Output, AppError>;
}

/// JSON body deserialized into `T` and passed through `T::validate`.
/// Any failure becomes a 400 in the uniform error shape.
pub struct ValidJson<T: Validate>(pub T::Output);

#[async_trait]
impl<S, T> FromRequest<S> for ValidJson<T>
where
    S: Send + Sync,
    T: Validate + DeserializeOwned,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(body) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection: JsonRejection| {
                warn!(error = %rejection.body_text(), "rejected request body");
                AppError::Validation("Datos de la solicitud inválidos".into())
            })?;
        Ok(Self(body.validate()?))
    }
}
