//! Trajectory sinks notified after each accepted optimization step.

use nalgebra::DVector;

/// One accepted optimization step.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Step number, starting at 1
    pub step: usize,
    /// Energy in kcal/mol at the geometry the step started from
    pub energy: f64,
    /// Cartesian coordinates in Angstrom after the step
    pub coords: DVector<f64>,
}

/// Receiver for optimization frames.
pub trait TrajectorySink {
    /// Called once per accepted step.
    fn record(&mut self, frame: &Frame);
}

/// Keeps every frame in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryTrajectory {
    /// Recorded frames in order
    pub frames: Vec<Frame>,
}

impl MemoryTrajectory {
    /// Empty trajectory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of recorded frames.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Whether nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Energies of all frames.
    pub fn energies(&self) -> Vec<f64> {
        self.frames.iter().map(|f| f.energy).collect()
    }

    /// Renders the trajectory as multi-frame XYZ text.
    pub fn to_xyz(&self, elements: &[String]) -> String {
        let mut out = String::new();
        for frame in &self.frames {
            out.push_str(&format!("{}\n", elements.len()));
            out.push_str(&format!("step {} energy {:.6} kcal/mol\n", frame.step, frame.energy));
            for (atom, element) in elements.iter().enumerate() {
                out.push_str(&format!(
                    "{:<2} {:14.8} {:14.8} {:14.8}\n",
                    element,
                    frame.coords[3 * atom],
                    frame.coords[3 * atom + 1],
                    frame.coords[3 * atom + 2]
                ));
            }
        }
        out
    }
}

impl TrajectorySink for MemoryTrajectory {
    fn record(&mut self, frame: &Frame) {
        self.frames.push(frame.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_trajectory_records_frames() {
        let mut traj = MemoryTrajectory::new();
        let elements = vec!["H".to_string(), "H".to_string()];
        traj.record(&Frame {
            step: 1,
            energy: -1.5,
            coords: DVector::from_vec(vec![0.0, 0.0, 0.0, 0.74, 0.0, 0.0]),
        });
        assert_eq!(traj.len(), 1);
        assert_eq!(traj.energies(), vec![-1.5]);

        let xyz = traj.to_xyz(&elements);
        let lines: Vec<&str> = xyz.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "2");
        assert!(lines[3].starts_with("H "));
        assert!(lines[3].contains("0.74000000"));
    }
}
