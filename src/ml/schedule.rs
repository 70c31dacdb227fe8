// ============================================================
// Layer 5 — Learning-Rate Schedule
// ============================================================
// Linear warmup (optional) followed by linear decay to zero
// at the final optimiser step:
//
//   step <  warmup : lr = base · step / warmup
//   step >= warmup : lr = base · (total − step) / (total − warmup)
//
// `step` counts optimiser updates already applied, so the first
// update uses lr(0) = base when there is no warmup.

/// Linear warmup then linear decay to zero
#[derive(Clone, Debug)]
pub struct LinearSchedule {
    base_lr:      f64,
    warmup_steps: usize,
    total_steps:  usize,
}

impl LinearSchedule {
    pub fn new(base_lr: f64, warmup_steps: usize, total_steps: usize) -> Self {
        Self { base_lr, warmup_steps, total_steps }
    }

    pub fn total_steps(&self) -> usize {
        self.total_steps
    }

    pub fn lr_at(&self, step: usize) -> f64 {
        if step < self.warmup_steps {
            return self.base_lr * step as f64 / self.warmup_steps.max(1) as f64;
        }
        let remaining = self.total_steps.saturating_sub(step) as f64;
        let span      = self.total_steps.saturating_sub(self.warmup_steps).max(1) as f64;
        self.base_lr * (remaining / span).max(0.0)
    }
}
