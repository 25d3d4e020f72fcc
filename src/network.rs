use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use rand::rngs::StdRng;

use crate::activations::{Activation, Loss};
use crate::layer::{ADAM_BETA1, ADAM_BETA2, ADAM_EPSILON, Layer};
use crate::matrix::Matrix;

/// An ordered stack of fully-connected layers.
///
/// N layer widths produce N-1 layers. The network owns a copy of the most
/// recent input batch so a later parameter update never depends on a buffer
/// the caller has already dropped. All layers share one Adam timestep that
/// only ever increases; resetting it mid-training would corrupt the bias
/// correction.
pub struct NeuralNetwork {
    layers: Vec<Layer>,
    network_input: Matrix,
    loss: Loss,
    learning_timestep: usize,
}

impl NeuralNetwork {
    /// Builds a network with leaky-ReLU hidden layers and a sigmoid output
    /// layer, the defaults for supervised targets in [0, 1].
    pub fn new(layer_sizes: &[usize], rng: &mut StdRng) -> Self {
        Self::with_activations(
            layer_sizes,
            Activation::LeakyRelu,
            Activation::Sigmoid,
            Loss::SquareError,
            rng,
        )
    }

    /// Builds a network with explicit hidden/output activations and loss.
    pub fn with_activations(
        layer_sizes: &[usize],
        hidden_activation: Activation,
        output_activation: Activation,
        loss: Loss,
        rng: &mut StdRng,
    ) -> Self {
        assert!(layer_sizes.len() >= 2, "a network needs at least two layer sizes");

        let mut layers = Vec::with_capacity(layer_sizes.len() - 1);
        for (i, pair) in layer_sizes.windows(2).enumerate() {
            let activation = if i == layer_sizes.len() - 2 {
                output_activation
            } else {
                hidden_activation
            };
            layers.push(Layer::new(pair[0], pair[1], activation, rng));
        }

        Self {
            layers,
            network_input: Matrix::zeros(0, 0),
            loss,
            learning_timestep: 0,
        }
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn input_count(&self) -> usize {
        self.layers[0].input_count()
    }

    pub fn output_count(&self) -> usize {
        self.layers[self.layers.len() - 1].output_count()
    }

    /// Output of the last forward pass. The buffer is overwritten by the next
    /// forward call.
    pub fn output(&self) -> &Matrix {
        self.layers[self.layers.len() - 1].outputs()
    }

    /// Index of the neuron with the highest output. Assumes the output holds
    /// a single data point (one column).
    pub fn classify(&self) -> usize {
        let out = self.output();
        let mut best = 0;
        for i in 1..out.size() {
            if out.get(i) > out.get(best) {
                best = i;
            }
        }
        best
    }

    /// Cascades the input through every layer and returns the final output.
    /// The input batch is cached for the next backward pass.
    pub fn forward(&mut self, inputs: &Matrix) -> &Matrix {
        self.network_input = inputs.clone();

        self.layers[0].forward(inputs);
        for i in 1..self.layers.len() {
            let (head, tail) = self.layers.split_at_mut(i);
            tail[0].forward(head[i - 1].outputs());
        }

        self.output()
    }

    /// Batch-averaged sum of the loss over the last layer's outputs.
    pub fn sum_loss(&self, expected_outputs: &Matrix) -> f32 {
        let last = &self.layers[self.layers.len() - 1];
        let mut sum = 0.0f32;
        for i in 0..last.outputs().size() {
            sum += self.loss.apply(last.outputs().get(i), expected_outputs.get(i));
        }
        sum / last.batch_size() as f32
    }

    /// Backpropagation against direct targets: the terminal gradient comes
    /// from the loss derivative, then every layer gets an Adam update.
    pub fn backward_to_target(&mut self, expected_outputs: &Matrix, learning_rate: f32) {
        let loss = self.loss;
        let last = self.layers.len() - 1;
        self.layers[last].output_gradients_from_loss(expected_outputs, loss);
        self.backprop_hidden_and_update(learning_rate);
    }

    /// Backpropagation with an externally supplied terminal gradient. This is
    /// the path the policy trainer uses to inject its surrogate-objective
    /// gradient instead of a supervised loss.
    pub fn backward_from_gradient(&mut self, output_gradients: Matrix, learning_rate: f32) {
        let last = self.layers.len() - 1;
        self.layers[last].set_output_gradients(output_gradients);
        self.backprop_hidden_and_update(learning_rate);
    }

    /// Shared backward tail: chain gradients from the last layer down, then
    /// run Adam on every layer with the single shared timestep. Layer order
    /// here is strictly sequential; layer i needs layer i+1's gradients.
    fn backprop_hidden_and_update(&mut self, learning_rate: f32) {
        for i in (0..self.layers.len() - 1).rev() {
            let (head, tail) = self.layers.split_at_mut(i + 1);
            head[i].backprop_gradients(&tail[0]);
        }

        self.learning_timestep += 1;
        let t = self.learning_timestep;

        self.layers[0].adam_step(
            &self.network_input,
            learning_rate,
            t,
            ADAM_BETA1,
            ADAM_BETA2,
            ADAM_EPSILON,
        );
        for i in 1..self.layers.len() {
            let (head, tail) = self.layers.split_at_mut(i);
            tail[0].adam_step(
                head[i - 1].outputs(),
                learning_rate,
                t,
                ADAM_BETA1,
                ADAM_BETA2,
                ADAM_EPSILON,
            );
        }
    }

    /// Forward + backward + loss in one call.
    pub fn learn(&mut self, inputs: &Matrix, expected_outputs: &Matrix, learning_rate: f32) -> f32 {
        self.forward(inputs);
        let loss = self.sum_loss(expected_outputs);
        self.backward_to_target(expected_outputs, learning_rate);
        loss
    }

    /// Runs `learn` once per (input, target) pair, in order, no shuffling.
    /// Returns the loss of the last pair.
    pub fn learn_batches(&mut self, data: &[(Matrix, Matrix)], learning_rate: f32) -> f32 {
        let mut last_loss = 0.0;
        for (inputs, expected) in data {
            last_loss = self.learn(inputs, expected, learning_rate);
        }
        last_loss
    }

    /// Binary layout: `[layer_count: i32][Layer x n]`. Activations and loss
    /// are not persisted; `load` must receive the same ones used at save time.
    pub fn save<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        out.write_all(&(self.layers.len() as i32).to_le_bytes())?;
        for layer in &self.layers {
            layer.save(out)?;
        }
        Ok(())
    }

    /// Reads a network written by `save`. Hidden layers get
    /// `hidden_activation`, the final layer gets `output_activation`.
    pub fn load<R: Read>(
        input: &mut R,
        hidden_activation: Activation,
        output_activation: Activation,
        loss: Loss,
    ) -> std::io::Result<Self> {
        let mut word = [0u8; 4];
        input.read_exact(&mut word)?;
        let layer_count = i32::from_le_bytes(word) as usize;

        let mut layers = Vec::with_capacity(layer_count);
        for i in 0..layer_count {
            let activation = if i == layer_count - 1 {
                output_activation
            } else {
                hidden_activation
            };
            layers.push(Layer::load(input, activation)?);
        }

        Ok(Self {
            layers,
            network_input: Matrix::zeros(0, 0),
            loss,
            learning_timestep: 0,
        })
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        let mut out = BufWriter::new(File::create(path)?);
        self.save(&mut out)
    }

    pub fn load_from_file<P: AsRef<Path>>(
        path: P,
        hidden_activation: Activation,
        output_activation: Activation,
        loss: Loss,
    ) -> std::io::Result<Self> {
        let mut input = BufReader::new(File::open(path)?);
        Self::load(&mut input, hidden_activation, output_activation, loss)
    }

    /// Saves under a generated file name, optionally embedding a score and a
    /// timestamp, e.g. `actor--score_132.50--07-08-2026_14-03.nn`.
    /// Returns the file name used.
    pub fn save_params(
        &self,
        network_name: &str,
        network_score: f32,
        include_time: bool,
    ) -> std::io::Result<String> {
        let mut name = String::from(network_name);
        if network_score >= 0.0 {
            name.push_str(&format!("--score_{network_score:.2}"));
        }
        if include_time {
            let stamp = chrono::Local::now().format("%d-%m-%Y_%H-%M");
            name.push_str(&format!("--{stamp}"));
        }
        name.push_str(".nn");

        self.save_to_file(&name)?;
        Ok(name)
    }
}
