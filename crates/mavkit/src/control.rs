//! Vehicle Control Core: high-level navigation intents layered on top of the
//! low-level MAVLink adapter in [`crate::vehicle`]. Every method here follows
//! the same command contract: validate -> geofence precheck -> abort gate ->
//! allocate a [`CommandHandle`] -> drive -> terminate.

use crate::error::VehicleError;
use crate::geometry::{Coordinate, VectorNED};
use crate::handle::{CommandDriver, CommandHandle, Progress, ProgressValue};
use crate::safety::{self, SafetyLimits};
use crate::snapshot::VehicleSnapshot;
use crate::vehicle::Vehicle;
use mavlink::common::MavCmd;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_millis(200);

impl Vehicle {
    fn check_abort(&self) -> Result<(), VehicleError> {
        if self.inner.abort_flag.load(Ordering::SeqCst) {
            Err(VehicleError::Aborted)
        } else {
            Ok(())
        }
    }

    fn current_snapshot(&self) -> VehicleSnapshot {
        self.snapshot().borrow().clone()
    }

    fn current_position(&self) -> Result<Coordinate, VehicleError> {
        self.current_snapshot()
            .position
            .ok_or_else(|| VehicleError::UnavailableTelemetry("position".to_string()))
    }

    async fn geofence_check_waypoint(&self, from: &Coordinate, to: &Coordinate) -> Result<(), VehicleError> {
        let check = self.inner.geofence.lock().expect("geofence lock poisoned").clone();
        match check {
            Some(check) => check.validate_waypoint(from, to).await,
            None => Ok(()),
        }
    }

    async fn geofence_check_speed(&self, at: &Coordinate, speed_mps: f64) -> Result<(), VehicleError> {
        let check = self.inner.geofence.lock().expect("geofence lock poisoned").clone();
        match check {
            Some(check) => check.validate_speed(at, speed_mps).await,
            None => Ok(()),
        }
    }

    async fn geofence_check_takeoff(&self, at: &Coordinate, altitude_m: f64) -> Result<(), VehicleError> {
        let check = self.inner.geofence.lock().expect("geofence lock poisoned").clone();
        match check {
            Some(check) => check.validate_takeoff(at, altitude_m).await,
            None => Ok(()),
        }
    }

    /// Allocate a handle for a new command, implicitly cancelling the
    /// previous one when `supersede` is true, or rejecting with
    /// `CommandBusy` when it is still running and `supersede` is false.
    async fn begin_command(
        &self,
        name: &str,
        timeout: Duration,
        supersede: bool,
    ) -> Result<(CommandDriver, CommandHandle), VehicleError> {
        self.check_abort()?;
        self.begin_command_unchecked(name, timeout, supersede).await
    }

    /// Same as [`Self::begin_command`] but skips the abort gate. Only the
    /// abort-triggered RTL/hold recovery action may use this: it must run
    /// while `abort_flag` is already set, which would otherwise reject it.
    async fn begin_command_unchecked(
        &self,
        name: &str,
        timeout: Duration,
        supersede: bool,
    ) -> Result<(CommandDriver, CommandHandle), VehicleError> {
        let mut slot = self.inner.active_command.lock().await;
        if let Some(active) = slot.as_ref() {
            if active.is_running() {
                if supersede {
                    active.cancel(true);
                } else {
                    return Err(VehicleError::CommandBusy);
                }
            }
        }
        let (driver, handle) = crate::handle::new_pair(name, timeout);
        *slot = Some(handle.clone());
        Ok((driver, handle))
    }

    /// Freeze in place. Copter-class vehicles hold in LOITER; ArduRover
    /// has no loiter concept and uses HOLD instead.
    async fn hold_wire(&self) -> Result<(), VehicleError> {
        match self.set_mode_by_name("LOITER").await {
            Ok(()) => Ok(()),
            Err(_) => self.set_mode_by_name("HOLD").await,
        }
    }

    /// Spawn the background task that repeatedly samples telemetry, reports
    /// progress, and terminates the handle when `progress_and_done` reports
    /// completion, the deadline elapses, or cancellation is requested.
    fn drive_to_completion<F>(&self, driver: CommandDriver, timeout: Duration, progress_and_done: F)
    where
        F: FnMut(&VehicleSnapshot) -> (Progress, bool) + Send + 'static,
    {
        self.drive_to_completion_inner(driver, timeout, false, |_| VehicleError::Timeout, progress_and_done)
    }

    /// `exempt_from_abort` lets the abort-triggered RTL recovery action keep
    /// running even though `abort_flag` is set — without it this loop would
    /// cancel that very command on its first tick. `timeout_error` builds the
    /// specific error variant (e.g. `GotoTimeout { distance_remaining_m }`)
    /// raised when `timeout` elapses, from the snapshot at that moment.
    fn drive_to_completion_inner<F, TE>(
        &self,
        driver: CommandDriver,
        timeout: Duration,
        exempt_from_abort: bool,
        timeout_error: TE,
        mut progress_and_done: F,
    ) where
        F: FnMut(&VehicleSnapshot) -> (Progress, bool) + Send + 'static,
        TE: Fn(&VehicleSnapshot) -> VehicleError + Send + 'static,
    {
        let vehicle = self.clone();
        tokio::spawn(async move {
            let snap_rx = vehicle.snapshot();
            let cancel_token = driver.cancellation_token();
            let deadline = tokio::time::sleep(timeout);
            tokio::pin!(deadline);
            let mut ticker = tokio::time::interval(DEFAULT_PROGRESS_INTERVAL);

            loop {
                tokio::select! {
                    biased;
                    _ = cancel_token.cancelled() => {
                        if driver.should_execute_cancel_action() {
                            let _ = vehicle.hold_wire().await;
                        }
                        let (progress, _) = progress_and_done(&snap_rx.borrow());
                        driver.cancelled(progress);
                        return;
                    }
                    _ = &mut deadline => {
                        warn!(command = driver.command_name(), "command timed out, holding position");
                        let _ = vehicle.hold_wire().await;
                        let snap = snap_rx.borrow().clone();
                        let (progress, _) = progress_and_done(&snap);
                        driver.time_out_with(progress, timeout_error(&snap));
                        return;
                    }
                    _ = ticker.tick() => {
                        if !exempt_from_abort && vehicle.inner.abort_flag.load(Ordering::SeqCst) {
                            let (progress, _) = progress_and_done(&snap_rx.borrow());
                            driver.cancelled(progress);
                            return;
                        }
                        let (progress, done) = progress_and_done(&snap_rx.borrow());
                        driver.set_progress(progress.clone());
                        if done {
                            debug!(command = driver.command_name(), "command completed");
                            driver.complete(progress);
                            return;
                        }
                    }
                }
            }
        });
    }

    // -----------------------------------------------------------------
    // Navigation commands
    // -----------------------------------------------------------------

    pub async fn goto(
        &self,
        target: Coordinate,
        tolerance_m: f64,
        speed_mps: Option<f64>,
        heading_deg: Option<f64>,
        timeout: Duration,
        wait: bool,
    ) -> Result<CommandHandle, VehicleError> {
        safety::validate_coordinate(&target).into_result("target")?;
        safety::validate_tolerance(tolerance_m).into_result("tolerance")?;
        let limits = self.safety_limits();
        let speed_mps = self.validate_or_clamp_speed(speed_mps, &limits)?;

        let origin = self.current_position()?;
        self.geofence_check_waypoint(&origin, &target).await?;
        if let Some(speed) = speed_mps {
            self.geofence_check_speed(&origin, speed).await?;
        }

        let (driver, handle) = self.begin_command("goto", timeout, false).await?;
        driver.set_running();

        if let Some(speed) = speed_mps {
            let _ = self.command_long(MavCmd::MAV_CMD_DO_CHANGE_SPEED, [1.0, speed as f32, -1.0, 0.0, 0.0, 0.0, 0.0]).await;
        }

        if let Err(err) = self
            .guided_goto_raw(target.latitude_deg, target.longitude_deg, target.altitude_m as f32)
            .await
        {
            driver.fail(VehicleError::NavigationFailed(err.to_string()), Progress::new());
            return self.finish(handle, wait).await;
        }
        let _ = heading_deg; // heading-at-waypoint handled by point_at when requested

        let target_for_driver = target.clone();
        let target_for_timeout = target.clone();
        self.drive_to_completion_inner(
            driver,
            timeout,
            false,
            move |snap| {
                let distance = match &snap.position {
                    Some(pos) => pos.distance_to(&target_for_timeout),
                    None => f64::MAX,
                };
                VehicleError::GotoTimeout { distance_remaining_m: distance }
            },
            move |snap| {
                let mut progress = Progress::new();
                let distance = match &snap.position {
                    Some(pos) => pos.distance_to(&target_for_driver),
                    None => f64::MAX,
                };
                progress.insert("distance".into(), ProgressValue::Number(distance));
                progress.insert("target".into(), ProgressValue::Coordinate(target_for_driver.clone()));
                progress.insert("tolerance".into(), ProgressValue::Number(tolerance_m));
                (progress, distance <= tolerance_m)
            },
        );

        self.finish(handle, wait).await
    }

    pub async fn takeoff(&self, altitude_m: f64, wait: bool) -> Result<CommandHandle, VehicleError> {
        safety::validate_altitude(altitude_m, 0.0, 10_000.0).into_result("altitude")?;
        let origin = self.current_snapshot().position.unwrap_or(Coordinate::new(0.0, 0.0, 0.0));
        self.geofence_check_takeoff(&origin, altitude_m).await?;

        let (driver, handle) = self.begin_command("takeoff", Duration::from_secs(120), false).await?;
        driver.set_running();

        if let Err(err) = self
            .command_long(MavCmd::MAV_CMD_NAV_TAKEOFF, [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, altitude_m as f32])
            .await
        {
            driver.fail(VehicleError::TakeoffFailed(err.to_string()), Progress::new());
            return self.finish(handle, wait).await;
        }

        self.drive_to_completion_inner(
            driver,
            Duration::from_secs(120),
            false,
            |_| VehicleError::TakeoffTimeout,
            move |snap| {
                let current = snap.altitude_m();
                let mut progress = Progress::new();
                progress.insert("current_altitude".into(), ProgressValue::Number(current));
                progress.insert("target_altitude".into(), ProgressValue::Number(altitude_m));
                progress.insert("altitude_remaining".into(), ProgressValue::Number((altitude_m - current).max(0.0)));
                let done = snap.in_air && current >= altitude_m - 0.5;
                (progress, done)
            },
        );

        self.finish(handle, wait).await
    }

    pub async fn land(&self, wait: bool) -> Result<CommandHandle, VehicleError> {
        let (driver, handle) = self.begin_command("land", Duration::from_secs(180), true).await?;
        driver.set_running();

        if let Err(err) = self
            .command_long(MavCmd::MAV_CMD_NAV_LAND, [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0])
            .await
        {
            driver.fail(VehicleError::LandingFailed(err.to_string()), Progress::new());
            return self.finish(handle, wait).await;
        }

        self.drive_to_completion_inner(
            driver,
            Duration::from_secs(180),
            false,
            |_| VehicleError::LandingTimeout,
            move |snap| {
                let mut progress = Progress::new();
                progress.insert("current_altitude".into(), ProgressValue::Number(snap.altitude_m()));
                progress.insert("landed_state".into(), ProgressValue::Text(format!("{:?}", snap.landed_state)));
                progress.insert("armed".into(), ProgressValue::Bool(snap.armed));
                let done = snap.landed_state == crate::snapshot::LandedState::OnGround && !snap.armed;
                (progress, done)
            },
        );

        self.finish(handle, wait).await
    }

    pub async fn rtl(&self, wait: bool) -> Result<CommandHandle, VehicleError> {
        let (driver, handle) = self.begin_command("rtl", Duration::from_secs(300), true).await?;
        driver.set_running();

        if let Err(err) = self.set_mode_by_name("RTL").await {
            driver.fail(VehicleError::NavigationFailed(err.to_string()), Progress::new());
            return self.finish(handle, wait).await;
        }

        self.drive_to_completion(driver, Duration::from_secs(300), move |snap| {
            let mut progress = Progress::new();
            let distance = snap.distance_to_home().unwrap_or(f64::MAX);
            progress.insert("distance_to_home".into(), ProgressValue::Number(distance));
            progress.insert("current_altitude".into(), ProgressValue::Number(snap.altitude_m()));
            progress.insert("landed_state".into(), ProgressValue::Text(format!("{:?}", snap.landed_state)));
            let done = distance <= 2.0 && snap.landed_state == crate::snapshot::LandedState::OnGround;
            (progress, done)
        });

        self.finish(handle, wait).await
    }

    pub async fn hold(&self) -> Result<CommandHandle, VehicleError> {
        let (driver, handle) = self.begin_command("hold", Duration::from_secs(5), true).await?;
        driver.set_running();
        match self.hold_wire().await {
            Ok(()) => driver.complete(Progress::new()),
            Err(err) => driver.fail(err, Progress::new()),
        }
        Ok(handle)
    }

    pub async fn set_heading(&self, heading_deg: f64, blocking: bool, timeout: Option<Duration>) -> Result<CommandHandle, VehicleError> {
        let timeout = timeout.unwrap_or(Duration::from_secs(30));
        let (driver, handle) = self.begin_command("set_heading", timeout, false).await?;
        driver.set_running();

        let snap = self.current_snapshot();
        let velocity = snap.velocity;
        if let Err(err) = self.set_velocity_ned(velocity.north as f32, velocity.east as f32, velocity.down as f32, Some(heading_deg as f32)).await {
            driver.fail(err, Progress::new());
            return self.finish(handle, blocking).await;
        }

        self.drive_to_completion(driver, timeout, move |snap| {
            let diff = crate::geometry::signed_angle_diff(snap.heading_deg, heading_deg);
            let mut progress = Progress::new();
            progress.insert("current_heading".into(), ProgressValue::Number(snap.heading_deg));
            progress.insert("target_heading".into(), ProgressValue::Number(heading_deg));
            progress.insert("heading_diff".into(), ProgressValue::Number(diff));
            (progress, diff.abs() <= 2.0)
        });

        self.finish(handle, blocking).await
    }

    pub async fn set_velocity(
        &self,
        velocity: VectorNED,
        heading_deg: Option<f64>,
        duration: Option<Duration>,
        wait: bool,
    ) -> Result<CommandHandle, VehicleError> {
        let limits = self.safety_limits();
        let outcome = safety::validate_velocity(&velocity, &limits);
        let velocity = if !outcome.ok {
            if limits.auto_clamp_values {
                safety::clamp_velocity(&velocity, &limits)
            } else {
                outcome.into_speed_result()?;
                unreachable!("into_speed_result returns Err when outcome.ok is false")
            }
        } else {
            velocity
        };

        let timeout = duration.unwrap_or(Duration::from_secs(3600));
        let (driver, handle) = self.begin_command("set_velocity", timeout, false).await?;
        driver.set_running();

        if let Err(err) = self
            .set_velocity_ned(velocity.north as f32, velocity.east as f32, velocity.down as f32, heading_deg.map(|h| h as f32))
            .await
        {
            driver.fail(err, Progress::new());
            return self.finish(handle, wait).await;
        }

        let started = tokio::time::Instant::now();
        self.drive_to_completion(driver, timeout, move |_snap| {
            let mut progress = Progress::new();
            let elapsed = started.elapsed();
            progress.insert("elapsed".into(), ProgressValue::Number(elapsed.as_secs_f64()));
            let done = match duration {
                Some(d) => {
                    progress.insert("duration".into(), ProgressValue::Number(d.as_secs_f64()));
                    progress.insert("time_remaining".into(), ProgressValue::Number(d.saturating_sub(elapsed).as_secs_f64()));
                    elapsed >= d
                }
                None => false,
            };
            (progress, done)
        });

        self.finish(handle, wait).await
    }

    pub async fn set_groundspeed(&self, speed_mps: f64) -> Result<(), VehicleError> {
        let limits = self.safety_limits();
        let speed_mps = self.validate_or_clamp_speed(Some(speed_mps), &limits)?.unwrap();
        self.command_long(MavCmd::MAV_CMD_DO_CHANGE_SPEED, [1.0, speed_mps as f32, -1.0, 0.0, 0.0, 0.0, 0.0]).await
    }

    pub async fn set_altitude(&self, altitude_m: f64, tolerance_m: f64, wait: bool) -> Result<CommandHandle, VehicleError> {
        let here = self.current_position()?;
        let target = Coordinate::new(here.latitude_deg, here.longitude_deg, altitude_m);
        self.goto(target, tolerance_m.max(0.1), None, None, Duration::from_secs(60), wait).await
    }

    pub async fn orbit(
        &self,
        center: Coordinate,
        radius_m: f64,
        speed_mps: f64,
        clockwise: bool,
        revolutions: f64,
        wait: bool,
    ) -> Result<CommandHandle, VehicleError> {
        safety::validate_coordinate(&center).into_result("center")?;
        let limits = self.safety_limits();
        let speed_mps = self.validate_or_clamp_speed(Some(speed_mps), &limits)?.unwrap();
        self.geofence_check_waypoint(&self.current_position()?, &center).await?;

        let timeout = Duration::from_secs_f64((2.0 * std::f64::consts::PI * radius_m / speed_mps.max(0.1) * revolutions.max(1.0) * 2.0).max(30.0));
        let (driver, handle) = self.begin_command("orbit", timeout, false).await?;
        driver.set_running();

        let radius_param = if clockwise { radius_m as f32 } else { -(radius_m as f32) };
        if let Err(err) = self
            .command_long(
                MavCmd::MAV_CMD_DO_ORBIT,
                [radius_param, speed_mps as f32, 0.0, f32::NAN, center.latitude_deg as f32, center.longitude_deg as f32, center.altitude_m as f32],
            )
            .await
        {
            driver.fail(VehicleError::NavigationFailed(err.to_string()), Progress::new());
            return self.finish(handle, wait).await;
        }

        let mut accumulated_deg = 0.0_f64;
        let mut last_bearing: Option<f64> = None;
        let target_revolutions = revolutions.max(0.0);
        let start = tokio::time::Instant::now();

        self.drive_to_completion(driver, timeout, move |snap| {
            let mut progress = Progress::new();
            if let Some(pos) = &snap.position {
                let bearing = center.bearing_to(pos);
                if let Some(last) = last_bearing {
                    accumulated_deg += crate::geometry::signed_angle_diff(last, bearing).abs();
                }
                last_bearing = Some(bearing);
            }
            let revolutions_completed = accumulated_deg / 360.0;
            progress.insert("revolutions_completed".into(), ProgressValue::Number(revolutions_completed));
            progress.insert("target_revolutions".into(), ProgressValue::Number(target_revolutions));
            progress.insert(
                "progress_percent".into(),
                ProgressValue::Number((revolutions_completed / target_revolutions.max(1e-9) * 100.0).min(100.0)),
            );
            progress.insert("time_remaining".into(), ProgressValue::Number(timeout.saturating_sub(start.elapsed()).as_secs_f64()));
            (progress, revolutions_completed >= target_revolutions)
        });

        self.finish(handle, wait).await
    }

    // -----------------------------------------------------------------
    // Movement helpers built on goto/geometry
    // -----------------------------------------------------------------

    pub async fn move_in_direction(&self, direction: VectorNED, distance_m: f64, wait: bool) -> Result<CommandHandle, VehicleError> {
        let origin = self.current_position()?;
        let unit = direction.normalize();
        let target = origin.offset_by(&unit.scale(distance_m));
        self.goto(target, 2.0, None, None, Duration::from_secs(300), wait).await
    }

    pub async fn move_in_current_direction(&self, distance_m: f64, wait: bool) -> Result<CommandHandle, VehicleError> {
        let heading = self.current_snapshot().velocity;
        self.move_in_direction(heading, distance_m, wait).await
    }

    pub async fn move_towards(&self, target: Coordinate, max_distance_m: f64, wait: bool) -> Result<CommandHandle, VehicleError> {
        let origin = self.current_position()?;
        let full_vector = origin.vector_to(&target);
        let distance = full_vector.magnitude();
        let capped = if distance > max_distance_m {
            origin.offset_by(&full_vector.normalize().scale(max_distance_m))
        } else {
            target
        };
        self.goto(capped, 2.0, None, None, Duration::from_secs(300), wait).await
    }

    pub async fn point_at(&self, target: Option<Coordinate>) -> Result<CommandHandle, VehicleError> {
        match target {
            Some(target) => {
                let origin = self.current_position()?;
                let bearing = origin.bearing_to(&target);
                self.set_heading(bearing, true, Some(Duration::from_secs(15))).await
            }
            None => self.hold().await,
        }
    }

    // -----------------------------------------------------------------
    // Abort
    // -----------------------------------------------------------------

    pub async fn abort(&self, rtl: bool) -> Result<CommandHandle, VehicleError> {
        self.inner.abort_flag.store(true, Ordering::SeqCst);
        if let Some(active) = self.inner.active_command.lock().await.as_ref() {
            active.cancel(true);
        }
        if rtl {
            self.abort_to_rtl().await
        } else {
            self.abort_to_hold().await
        }
    }

    /// Drives RTL directly, bypassing the abort gate that the public `rtl()`
    /// would hit since `abort_flag` is already set at this point.
    async fn abort_to_rtl(&self) -> Result<CommandHandle, VehicleError> {
        let (driver, handle) = self.begin_command_unchecked("rtl", Duration::from_secs(300), true).await?;
        driver.set_running();

        if let Err(err) = self.set_mode_by_name("RTL").await {
            driver.fail(VehicleError::NavigationFailed(err.to_string()), Progress::new());
            return self.finish(handle, false).await;
        }

        self.drive_to_completion_inner(driver, Duration::from_secs(300), true, |_| VehicleError::Timeout, move |snap| {
            let mut progress = Progress::new();
            let distance = snap.distance_to_home().unwrap_or(f64::MAX);
            progress.insert("distance_to_home".into(), ProgressValue::Number(distance));
            progress.insert("current_altitude".into(), ProgressValue::Number(snap.altitude_m()));
            progress.insert("landed_state".into(), ProgressValue::Text(format!("{:?}", snap.landed_state)));
            let done = distance <= 2.0 && snap.landed_state == crate::snapshot::LandedState::OnGround;
            (progress, done)
        });

        self.finish(handle, false).await
    }

    /// Drives hold directly, bypassing the abort gate for the same reason
    /// as [`Self::abort_to_rtl`].
    async fn abort_to_hold(&self) -> Result<CommandHandle, VehicleError> {
        let (driver, handle) = self.begin_command_unchecked("hold", Duration::from_secs(5), true).await?;
        driver.set_running();
        match self.hold_wire().await {
            Ok(()) => driver.complete(Progress::new()),
            Err(err) => driver.fail(err, Progress::new()),
        }
        Ok(handle)
    }

    pub fn reset_abort(&self) {
        self.inner.abort_flag.store(false, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.inner.abort_flag.load(Ordering::SeqCst)
    }

    // -----------------------------------------------------------------
    // Internal helpers
    // -----------------------------------------------------------------

    fn validate_or_clamp_speed(&self, speed_mps: Option<f64>, limits: &SafetyLimits) -> Result<Option<f64>, VehicleError> {
        match speed_mps {
            None => Ok(None),
            Some(speed) => {
                let outcome = safety::validate_speed(speed, limits);
                if outcome.ok {
                    Ok(Some(speed))
                } else if limits.auto_clamp_values {
                    Ok(Some(safety::clamp_speed(speed, limits)))
                } else {
                    outcome.into_speed_result().map(|_| None)
                }
            }
        }
    }

    async fn finish(&self, handle: CommandHandle, wait: bool) -> Result<CommandHandle, VehicleError> {
        if wait {
            handle.wait(None).await;
        }
        Ok(handle)
    }
}

