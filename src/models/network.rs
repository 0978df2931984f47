//! Feed-forward regression network.
//!
//! Dense layers with ReLU on every hidden layer and a single linear output.
//! Training uses the Huber loss and Adam. Inverted dropout is applied between
//! hidden layers during training only, so inference is deterministic. Early
//! stopping watches the validation loss (restoring the best weights), and the
//! learning rate is halved when that loss plateaus.

use crate::error::{Result, ServiceError};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Network architecture and training schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkParams {
    /// Widths of the hidden layers, input side first
    pub hidden_layers: Vec<usize>,
    /// Dropout rate between hidden layers
    pub dropout: f64,
    /// Initial Adam learning rate
    pub learning_rate: f64,
    /// Huber loss transition point
    pub huber_delta: f64,
    /// Epoch budget
    pub epochs: usize,
    pub batch_size: usize,
    /// Trailing fraction of the training rows held out for validation
    pub validation_split: f64,
    /// Epochs without improvement before training stops
    pub early_stopping_patience: usize,
    /// Learning-rate multiplier applied on plateau
    pub plateau_factor: f64,
    /// Epochs without improvement before the learning rate is reduced
    pub plateau_patience: usize,
    pub min_learning_rate: f64,
}

impl Default for NetworkParams {
    fn default() -> Self {
        Self {
            hidden_layers: vec![64, 32],
            dropout: 0.3,
            learning_rate: 0.001,
            huber_delta: 1.0,
            epochs: 5,
            batch_size: 512,
            validation_split: 0.2,
            early_stopping_patience: 5,
            plateau_factor: 0.5,
            plateau_patience: 2,
            min_learning_rate: 0.0,
        }
    }
}

/// Loss curves and schedule decisions from one training run.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingHistory {
    pub train_loss: Vec<f64>,
    /// Monitored loss per epoch (training loss when there is no validation split)
    pub val_loss: Vec<f64>,
    pub best_epoch: usize,
    pub stopped_early: bool,
    pub final_learning_rate: f64,
}

impl TrainingHistory {
    pub fn epochs_run(&self) -> usize {
        self.train_loss.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct DenseLayer {
    inputs: usize,
    outputs: usize,
    /// Row-major `outputs x inputs`
    weights: Vec<f64>,
    biases: Vec<f64>,
}

impl DenseLayer {
    /// Glorot-uniform weights, zero biases.
    fn glorot(inputs: usize, outputs: usize, rng: &mut StdRng) -> Self {
        let limit = (6.0 / (inputs + outputs) as f64).sqrt();
        let weights = (0..inputs * outputs)
            .map(|_| rng.gen_range(-limit..limit))
            .collect();

        Self {
            inputs,
            outputs,
            weights,
            biases: vec![0.0; outputs],
        }
    }

    fn forward(&self, input: &[f64]) -> Vec<f64> {
        self.weights
            .chunks(self.inputs)
            .zip(&self.biases)
            .map(|(w, b)| b + w.iter().zip(input).map(|(w, x)| w * x).sum::<f64>())
            .collect()
    }
}

#[derive(Debug, Clone)]
struct LayerGradients {
    weights: Vec<f64>,
    biases: Vec<f64>,
}

impl LayerGradients {
    fn zeros_like(layer: &DenseLayer) -> Self {
        Self {
            weights: vec![0.0; layer.weights.len()],
            biases: vec![0.0; layer.biases.len()],
        }
    }
}

/// Trained feed-forward regressor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedForwardNetwork {
    layers: Vec<DenseLayer>,
}

impl FeedForwardNetwork {
    fn new(n_inputs: usize, hidden_layers: &[usize], rng: &mut StdRng) -> Self {
        let mut layers = Vec::with_capacity(hidden_layers.len() + 1);
        let mut inputs = n_inputs;
        for &width in hidden_layers {
            layers.push(DenseLayer::glorot(inputs, width, rng));
            inputs = width;
        }
        layers.push(DenseLayer::glorot(inputs, 1, rng));
        Self { layers }
    }

    /// Width of the input layer.
    pub fn n_features(&self) -> usize {
        self.layers.first().map_or(0, |l| l.inputs)
    }

    /// Reject deserialized layers whose shapes do not chain into a single
    /// output.
    pub fn check_consistency(&self) -> std::result::Result<(), String> {
        let Some(last) = self.layers.last() else {
            return Err("network has no layers".to_string());
        };
        if last.outputs != 1 {
            return Err(format!("output layer has {} units", last.outputs));
        }
        let mut expected_inputs = self.n_features();
        for (idx, layer) in self.layers.iter().enumerate() {
            if layer.inputs == 0 || layer.inputs != expected_inputs {
                return Err(format!(
                    "layer {} takes {} inputs, expected {}",
                    idx, layer.inputs, expected_inputs
                ));
            }
            if layer.weights.len() != layer.inputs * layer.outputs
                || layer.biases.len() != layer.outputs
            {
                return Err(format!(
                    "layer {} holds {} weights and {} biases for {}x{}",
                    idx,
                    layer.weights.len(),
                    layer.biases.len(),
                    layer.outputs,
                    layer.inputs
                ));
            }
            if layer
                .weights
                .iter()
                .chain(&layer.biases)
                .any(|v| !v.is_finite())
            {
                return Err(format!("layer {} has non-finite parameters", idx));
            }
            expected_inputs = layer.outputs;
        }
        Ok(())
    }

    /// Inference pass; dropout is never active here.
    pub fn predict_row(&self, row: &[f64]) -> f64 {
        let last = self.layers.len() - 1;
        let mut activation = row.to_vec();
        for (idx, layer) in self.layers.iter().enumerate() {
            let z = layer.forward(&activation);
            activation = if idx < last { relu(z) } else { z };
        }
        activation[0]
    }

    /// Estimates for every row.
    pub fn predict(&self, rows: &[Vec<f64>]) -> Vec<f64> {
        rows.iter().map(|row| self.predict_row(row)).collect()
    }

    /// Train a fresh network. All randomness (initialization, shuffling,
    /// dropout masks) comes from `seed`.
    pub fn fit(
        x: &[Vec<f64>],
        y: &[f64],
        params: &NetworkParams,
        seed: u64,
    ) -> Result<(Self, TrainingHistory)> {
        if x.len() != y.len() {
            return Err(ServiceError::TrainingFailure(format!(
                "network got {} rows but {} targets",
                x.len(),
                y.len()
            )));
        }
        if x.is_empty() {
            return Err(ServiceError::TrainingFailure(
                "cannot fit network on zero samples".to_string(),
            ));
        }
        if params.batch_size == 0 {
            return Err(ServiceError::TrainingFailure(
                "network batch_size must be positive".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&params.dropout) {
            return Err(ServiceError::TrainingFailure(format!(
                "network dropout must be in [0, 1), got {}",
                params.dropout
            )));
        }

        let n = x.len();
        let split_at = if params.validation_split > 0.0 {
            ((n as f64 * (1.0 - params.validation_split)).floor() as usize).clamp(1, n)
        } else {
            n
        };
        let validation: Vec<usize> = (split_at..n).collect();

        let mut rng = StdRng::seed_from_u64(seed);
        let mut network = Self::new(x[0].len(), &params.hidden_layers, &mut rng);
        let target_mean = y[..split_at].iter().sum::<f64>() / split_at as f64;
        if let Some(output) = network.layers.last_mut() {
            output.biases[0] = target_mean;
        }

        let mut optimizer = Adam::new(&network, params.learning_rate);
        let mut early_stopping = EarlyStopping::new(params.early_stopping_patience);
        let mut plateau = ReduceOnPlateau::new(
            params.plateau_factor,
            params.plateau_patience,
            params.min_learning_rate,
        );

        let mut best = network.clone();
        let mut history = TrainingHistory {
            train_loss: Vec::with_capacity(params.epochs),
            val_loss: Vec::with_capacity(params.epochs),
            best_epoch: 0,
            stopped_early: false,
            final_learning_rate: params.learning_rate,
        };

        let mut order: Vec<usize> = (0..split_at).collect();
        for epoch in 0..params.epochs {
            order.shuffle(&mut rng);

            let mut epoch_loss = 0.0;
            for batch in order.chunks(params.batch_size) {
                let (loss, gradients) = network.batch_gradients(x, y, batch, params, &mut rng);
                if !loss.is_finite() {
                    return Err(ServiceError::TrainingFailure(format!(
                        "network loss diverged in epoch {}",
                        epoch
                    )));
                }
                optimizer.step(&mut network, &gradients);
                epoch_loss += loss * batch.len() as f64;
            }
            let train_loss = epoch_loss / split_at as f64;

            let monitored = if validation.is_empty() {
                train_loss
            } else {
                network.mean_loss(x, y, &validation, params.huber_delta)
            };
            if !monitored.is_finite() {
                return Err(ServiceError::TrainingFailure(format!(
                    "network validation loss diverged in epoch {}",
                    epoch
                )));
            }

            history.train_loss.push(train_loss);
            history.val_loss.push(monitored);
            debug!(
                epoch = epoch,
                train_loss = train_loss,
                val_loss = monitored,
                learning_rate = optimizer.lr,
                "Network epoch complete"
            );

            match early_stopping.update(monitored) {
                Progress::Improved => {
                    best = network.clone();
                    history.best_epoch = epoch;
                }
                Progress::Stalled => {}
                Progress::Stop => {
                    history.stopped_early = true;
                    break;
                }
            }
            optimizer.lr = plateau.update(monitored, optimizer.lr);
        }

        history.final_learning_rate = optimizer.lr;
        Ok((best, history))
    }

    /// Mean Huber loss over `rows` with dropout disabled.
    fn mean_loss(&self, x: &[Vec<f64>], y: &[f64], rows: &[usize], delta: f64) -> f64 {
        let total: f64 = rows
            .iter()
            .map(|&i| huber(self.predict_row(&x[i]) - y[i], delta))
            .sum();
        total / rows.len() as f64
    }

    /// Mean batch loss and its gradients, with dropout active.
    fn batch_gradients(
        &self,
        x: &[Vec<f64>],
        y: &[f64],
        batch: &[usize],
        params: &NetworkParams,
        rng: &mut StdRng,
    ) -> (f64, Vec<LayerGradients>) {
        let last = self.layers.len() - 1;
        let keep = 1.0 - params.dropout;
        let scale = 1.0 / batch.len() as f64;

        let mut gradients: Vec<LayerGradients> =
            self.layers.iter().map(LayerGradients::zeros_like).collect();
        let mut loss = 0.0;

        for &sample in batch {
            // inputs[l] feeds layer l; hidden[l] and masks[l] belong to hidden layer l
            let mut inputs: Vec<Vec<f64>> = vec![x[sample].clone()];
            let mut hidden: Vec<Vec<f64>> = Vec::with_capacity(last);
            let mut masks: Vec<Vec<f64>> = Vec::with_capacity(last);
            let mut output = 0.0;

            for (idx, layer) in self.layers.iter().enumerate() {
                let z = layer.forward(&inputs[idx]);
                if idx < last {
                    let h = relu(z);
                    let mask: Vec<f64> = (0..h.len())
                        .map(|_| {
                            if params.dropout > 0.0 && rng.gen::<f64>() < params.dropout {
                                0.0
                            } else {
                                1.0 / keep
                            }
                        })
                        .collect();
                    inputs.push(h.iter().zip(&mask).map(|(a, m)| a * m).collect());
                    hidden.push(h);
                    masks.push(mask);
                } else {
                    output = z[0];
                }
            }

            let residual = output - y[sample];
            loss += huber(residual, params.huber_delta);

            let mut delta = vec![huber_grad(residual, params.huber_delta) * scale];
            for idx in (0..self.layers.len()).rev() {
                let layer = &self.layers[idx];
                let grad = &mut gradients[idx];

                for (o, d) in delta.iter().enumerate() {
                    grad.biases[o] += d;
                    let row = &mut grad.weights[o * layer.inputs..(o + 1) * layer.inputs];
                    for (g, a) in row.iter_mut().zip(&inputs[idx]) {
                        *g += d * a;
                    }
                }

                if idx == 0 {
                    break;
                }

                let mut previous = vec![0.0; layer.inputs];
                for (o, d) in delta.iter().enumerate() {
                    let w = &layer.weights[o * layer.inputs..(o + 1) * layer.inputs];
                    for (p, w) in previous.iter_mut().zip(w) {
                        *p += w * d;
                    }
                }
                let h = &hidden[idx - 1];
                let mask = &masks[idx - 1];
                delta = previous
                    .iter()
                    .zip(h)
                    .zip(mask)
                    .map(|((p, h), m)| if *h > 0.0 { p * m } else { 0.0 })
                    .collect();
            }
        }

        (loss * scale, gradients)
    }
}

fn relu(mut z: Vec<f64>) -> Vec<f64> {
    for v in &mut z {
        *v = v.max(0.0);
    }
    z
}

fn huber(residual: f64, delta: f64) -> f64 {
    let abs = residual.abs();
    if abs <= delta {
        0.5 * residual * residual
    } else {
        delta * (abs - 0.5 * delta)
    }
}

fn huber_grad(residual: f64, delta: f64) -> f64 {
    residual.clamp(-delta, delta)
}

/// Adam with bias correction.
struct Adam {
    lr: f64,
    beta1: f64,
    beta2: f64,
    eps: f64,
    t: i32,
    m: Vec<LayerGradients>,
    v: Vec<LayerGradients>,
}

impl Adam {
    fn new(network: &FeedForwardNetwork, lr: f64) -> Self {
        let zeros: Vec<LayerGradients> = network
            .layers
            .iter()
            .map(LayerGradients::zeros_like)
            .collect();
        Self {
            lr,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-7,
            t: 0,
            m: zeros.clone(),
            v: zeros,
        }
    }

    fn step(&mut self, network: &mut FeedForwardNetwork, gradients: &[LayerGradients]) {
        self.t += 1;
        let correction1 = 1.0 - self.beta1.powi(self.t);
        let correction2 = 1.0 - self.beta2.powi(self.t);

        for (((layer, grad), m), v) in network
            .layers
            .iter_mut()
            .zip(gradients)
            .zip(&mut self.m)
            .zip(&mut self.v)
        {
            let update = |params: &mut [f64], grads: &[f64], m: &mut [f64], v: &mut [f64]| {
                for i in 0..params.len() {
                    let g = grads[i];
                    m[i] = self.beta1 * m[i] + (1.0 - self.beta1) * g;
                    v[i] = self.beta2 * v[i] + (1.0 - self.beta2) * g * g;
                    let m_hat = m[i] / correction1;
                    let v_hat = v[i] / correction2;
                    params[i] -= self.lr * m_hat / (v_hat.sqrt() + self.eps);
                }
            };
            update(&mut layer.weights, &grad.weights, &mut m.weights, &mut v.weights);
            update(&mut layer.biases, &grad.biases, &mut m.biases, &mut v.biases);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Progress {
    Improved,
    Stalled,
    Stop,
}

/// Stops once the monitored loss fails to improve for `patience` epochs.
#[derive(Debug)]
struct EarlyStopping {
    patience: usize,
    best: f64,
    wait: usize,
}

impl EarlyStopping {
    fn new(patience: usize) -> Self {
        Self {
            patience,
            best: f64::INFINITY,
            wait: 0,
        }
    }

    fn update(&mut self, loss: f64) -> Progress {
        if loss < self.best {
            self.best = loss;
            self.wait = 0;
            return Progress::Improved;
        }
        self.wait += 1;
        if self.wait >= self.patience {
            Progress::Stop
        } else {
            Progress::Stalled
        }
    }
}

/// Multiplies the learning rate by `factor` after `patience` epochs without improvement.
#[derive(Debug)]
struct ReduceOnPlateau {
    factor: f64,
    patience: usize,
    min_lr: f64,
    best: f64,
    wait: usize,
}

impl ReduceOnPlateau {
    fn new(factor: f64, patience: usize, min_lr: f64) -> Self {
        Self {
            factor,
            patience,
            min_lr,
            best: f64::INFINITY,
            wait: 0,
        }
    }

    fn update(&mut self, loss: f64, lr: f64) -> f64 {
        if loss < self.best {
            self.best = loss;
            self.wait = 0;
            return lr;
        }
        self.wait += 1;
        if self.wait >= self.patience {
            self.wait = 0;
            (lr * self.factor).max(self.min_lr)
        } else {
            lr
        }
    }
}
