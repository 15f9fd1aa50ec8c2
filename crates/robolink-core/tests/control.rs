use pretty_assertions::assert_eq;
use robolink_core::control::{
    differential, LostTarget, PidController, PidDrive, VisionSample, WheelSpeeds, SPEED_LIMIT,
};
use robolink_core::link::DriveCommand;
use robolink_core::settings::PidSettings;

#[test]
fn test_proportional_gain_passes_error_through() {
    let mut pid = PidController::new(1.0, 0.0, 0.0);
    assert_eq!(pid.update(50.0), 50.0);
}

#[test]
fn test_unit_integral_gain_sums_errors() {
    let mut pid = PidController::new(0.0, 1.0, 0.0);
    assert_eq!(pid.update(10.0), 10.0);
    assert_eq!(pid.update(10.0), 20.0);
}

#[test]
fn test_wheels_stay_in_range_for_any_output() {
    for output in [-1e6_f32, -250.0, -100.5, -0.9, 0.0, 0.9, 99.9, 180.0, 1e6] {
        let w = differential(50, output, SPEED_LIMIT);
        assert!((-SPEED_LIMIT..=SPEED_LIMIT).contains(&w.left), "{:?}", w);
        assert!((-SPEED_LIMIT..=SPEED_LIMIT).contains(&w.right), "{:?}", w);
    }
    assert_eq!(differential(50, 0.9, SPEED_LIMIT), WheelSpeeds { left: 50, right: 50 });
}

#[test]
fn test_line_following_run() {
    let settings = PidSettings {
        kp: 0.5,
        ki: 0.0,
        kd: 0.25,
        max_speed: 40,
    };
    let mut drive = PidDrive::new(&settings, LostTarget::Stop);
    drive.activate();

    let samples = [
        VisionSample::found(20),
        VisionSample::found(10),
        VisionSample::lost(),
        VisionSample::found(-40),
    ];
    let commands: Vec<String> = samples
        .into_iter()
        .filter_map(|s| drive.on_sample(s))
        .map(|c| c.to_string())
        .collect();

    // 20*0.5 + 20*0.25 = 15; 10*0.5 - 10*0.25 = 2.5; -40*0.5 - 50*0.25 = -32.5
    assert_eq!(commands, vec!["s,55,25", "s,42,38", "s,0,0", "s,8,72"]);
}

#[test]
fn test_restart_forgets_previous_run() {
    let settings = PidSettings {
        kp: 0.0,
        ki: 1.0,
        kd: 0.0,
        max_speed: 0,
    };
    let mut drive = PidDrive::new(&settings, LostTarget::Reset);
    drive.activate();
    drive.on_sample(VisionSample::found(30));
    drive.on_sample(VisionSample::found(30));

    drive.activate();
    assert_eq!(
        drive.on_sample(VisionSample::found(30)),
        Some(DriveCommand::Speed { left: 30, right: -30 })
    );
}

#[test]
fn test_face_pursuit_search_cycle() {
    let mut drive = PidDrive::new(&PidSettings::default(), LostTarget::Reset);
    drive.activate();

    let face = VisionSample::from_horizontal_position(400.0, 640.0);
    assert_eq!(face.error, 25);
    assert_eq!(
        drive.on_sample(face),
        Some(DriveCommand::Speed { left: 75, right: 25 })
    );

    let lost: Vec<Option<DriveCommand>> =
        (0..3).map(|_| drive.on_sample(VisionSample::lost())).collect();
    assert_eq!(lost, vec![Some(DriveCommand::Reset), None, None]);
    assert_eq!(drive.deactivate(), DriveCommand::stop());
}

#[test]
fn test_apply_settings_changes_speed() {
    let mut drive = PidDrive::new(&PidSettings::default(), LostTarget::Stop);
    drive.apply_settings(&PidSettings {
        max_speed: 80,
        ..PidSettings::default()
    });
    assert_eq!(drive.max_speed(), 80);
    assert_eq!(
        drive.on_sample(VisionSample::found(30)),
        Some(DriveCommand::Speed { left: 100, right: 50 })
    );
}
