//! Session observers
//!
//! The resource/topic layer learns about new samples, alarm transitions and
//! patient changes through [`MonitorObserver`]. Callbacks fire synchronously
//! from inside `dispatch`, after the session has updated its own state.

use crate::alarm::AlarmState;
use crate::sampling::Sample;

/// Receives session notifications
pub trait MonitorObserver {
    /// A sample was taken while operational
    fn on_sample(&mut self, sample: &Sample);

    /// The alarm switched on or off
    fn on_alarm_state_changed(&mut self, state: AlarmState);

    /// A patient was bound (`Some`) or unbound (`None`)
    fn on_patient_changed(&mut self, patient_id: Option<&str>);
}

/// Ignores every notification
impl MonitorObserver for () {
    fn on_sample(&mut self, _sample: &Sample) {}

    fn on_alarm_state_changed(&mut self, _state: AlarmState) {}

    fn on_patient_changed(&mut self, _patient_id: Option<&str>) {}
}

impl<O: MonitorObserver + ?Sized> MonitorObserver for &mut O {
    fn on_sample(&mut self, sample: &Sample) {
        (**self).on_sample(sample)
    }

    fn on_alarm_state_changed(&mut self, state: AlarmState) {
        (**self).on_alarm_state_changed(state)
    }

    fn on_patient_changed(&mut self, patient_id: Option<&str>) {
        (**self).on_patient_changed(patient_id)
    }
}
