use crate::carrier;

/// Numbers assigned to one modem port, checked in order by that port's worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortPlan {
    pub port: String,
    pub numbers: Vec<String>,
    /// This worker owns the audio source.
    pub audio: bool,
}

/// Split `numbers` across `ports`.
///
/// With an `audio_port`, every number of an audio-checked carrier goes to that port,
/// in input order, since the audio hardware follows one call at a time. Everything
/// else is dealt round-robin over the other ports, or over the audio port too when
/// it is the only one. Without an audio port all numbers are dealt round-robin.
/// Plans come back in `ports` order, including ports that received nothing.
pub fn partition(numbers: &[String], ports: &[String], audio_port: Option<&str>) -> Vec<PortPlan> {
    let mut plans: Vec<PortPlan> = ports
        .iter()
        .map(|port| PortPlan {
            port: port.clone(),
            numbers: Vec::new(),
            audio: Some(port.as_str()) == audio_port,
        })
        .collect();
    if plans.is_empty() {
        return plans;
    }

    let audio_index = plans.iter().position(|plan| plan.audio);
    let shared: Vec<usize> = match audio_index {
        Some(audio) if plans.len() > 1 => (0..plans.len()).filter(|idx| *idx != audio).collect(),
        _ => (0..plans.len()).collect(),
    };

    let mut next = 0usize;
    for number in numbers {
        let class = carrier::classify(number);
        let target = match audio_index {
            Some(audio) if class.needs_audio() => audio,
            _ => {
                let idx = shared[next % shared.len()];
                next += 1;
                idx
            }
        };
        plans[target].numbers.push(number.clone());
    }
    plans
}
