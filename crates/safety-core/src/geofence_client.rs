//! Geofence client: the out-of-process safety validator consulted by the
//! Vehicle Control Core before a navigation command is issued. Implements
//! `mavkit::safety::GeofenceCheck` over the length-prefixed JSON transport
//! described in the wire protocol module.

use crate::wire::{read_frame, write_frame, Position, Reply, Request};
use mavkit::safety::{BoxFuture, GeofenceCheck};
use mavkit::{Coordinate, VehicleError};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::debug;

const REPLY_TIMEOUT: Duration = Duration::from_secs(1);

/// Geofence client over a single persistent TCP connection. The transport
/// is exclusive per instance: only one request is in flight at a time,
/// enforced with a `tokio::sync::Mutex` around the stream.
pub struct GeofenceClient {
    stream: Mutex<TcpStream>,
}

impl GeofenceClient {
    pub async fn connect(addr: &str) -> Result<Self, VehicleError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|err| VehicleError::ConnectionFailed(err.to_string()))?;
        Ok(Self { stream: Mutex::new(stream) })
    }

    pub async fn status(&self) -> Result<bool, VehicleError> {
        let reply = self.call(Request::Status).await?;
        Ok(reply.is_valid())
    }

    async fn call(&self, request: Request) -> Result<Reply, VehicleError> {
        let mut stream = self.stream.lock().await;
        let exchange = async {
            write_frame(&mut *stream, &request).await?;
            read_frame::<_, Reply>(&mut *stream).await
        };
        match tokio::time::timeout(REPLY_TIMEOUT, exchange).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(err)) => {
                debug!(%err, "geofence transport error");
                Err(VehicleError::GeofenceUnavailable)
            }
            Err(_) => Err(VehicleError::GeofenceUnavailable),
        }
    }
}

fn to_wire(coord: &Coordinate) -> Position {
    Position {
        lat: coord.latitude_deg,
        lon: coord.longitude_deg,
        alt: coord.altitude_m,
    }
}

impl GeofenceCheck for GeofenceClient {
    fn validate_waypoint<'a>(
        &'a self,
        from: &'a Coordinate,
        to: &'a Coordinate,
    ) -> BoxFuture<'a, Result<(), VehicleError>> {
        Box::pin(async move {
            let reply = self
                .call(Request::Waypoint {
                    from: to_wire(from),
                    to: to_wire(to),
                })
                .await?;
            if reply.is_valid() {
                Ok(())
            } else {
                Err(VehicleError::GeofenceViolation {
                    current_position: from.clone(),
                    target_position: to.clone(),
                    reason: reply
                        .reason()
                        .map(str::to_string)
                        .unwrap_or_else(|| String::from("target outside permitted region")),
                })
            }
        })
    }

    fn validate_speed<'a>(&'a self, at: &'a Coordinate, speed_mps: f64) -> BoxFuture<'a, Result<(), VehicleError>> {
        Box::pin(async move {
            let reply = self.call(Request::Speed { speed: speed_mps }).await?;
            if reply.is_valid() {
                Ok(())
            } else {
                Err(VehicleError::GeofenceViolation {
                    current_position: at.clone(),
                    target_position: at.clone(),
                    reason: format!("speed {speed_mps} outside permitted range"),
                })
            }
        })
    }

    fn validate_takeoff<'a>(
        &'a self,
        at: &'a Coordinate,
        altitude_m: f64,
    ) -> BoxFuture<'a, Result<(), VehicleError>> {
        Box::pin(async move {
            let reply = self
                .call(Request::Takeoff {
                    alt: altitude_m,
                    lat: at.latitude_deg,
                    lon: at.longitude_deg,
                })
                .await?;
            if reply.is_valid() {
                Ok(())
            } else {
                Err(VehicleError::GeofenceViolation {
                    current_position: at.clone(),
                    target_position: Coordinate::new(at.latitude_deg, at.longitude_deg, altitude_m),
                    reason: format!("takeoff altitude {altitude_m} outside permitted range"),
                })
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{read_frame, write_frame};
    use tokio::net::TcpListener;

    async fn echo_server_once(listener: TcpListener, reply: Reply) {
        let (mut socket, _) = listener.accept().await.unwrap();
        let _request: Request = read_frame(&mut socket).await.unwrap();
        write_frame(&mut socket, &reply).await.unwrap();
    }

    #[tokio::test]
    async fn validate_waypoint_accepts_valid_reply() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(echo_server_once(listener, Reply::valid(true, None)));

        let client = GeofenceClient::connect(&addr.to_string()).await.unwrap();
        let from = Coordinate::new(35.0, -78.0, 10.0);
        let to = Coordinate::new(35.001, -78.001, 10.0);
        assert!(client.validate_waypoint(&from, &to).await.is_ok());
    }

    #[tokio::test]
    async fn validate_waypoint_surfaces_rejection_reason() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(echo_server_once(
            listener,
            Reply::valid(false, Some(String::from("outside include polygon"))),
        ));

        let client = GeofenceClient::connect(&addr.to_string()).await.unwrap();
        let from = Coordinate::new(35.0, -78.0, 10.0);
        let to = Coordinate::new(35.001, -78.001, 10.0);
        let err = client.validate_waypoint(&from, &to).await.unwrap_err();
        assert!(matches!(err, VehicleError::GeofenceViolation { .. }));
    }
}
