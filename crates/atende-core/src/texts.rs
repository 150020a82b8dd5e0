//! Customer-facing texts.

pub fn main_menu(company: &str) -> String {
    format!(
        "Olá! 👋 Bem-vindo(a) ao atendimento da *{}*.\n\n\
         Escolha uma opção:\n\
         *1* - 💳 Segunda via / pagamento (PIX ou Boleto)\n\
         *2* - 🛠️ Suporte técnico\n\
         *3* - 👤 Falar com um atendente\n\
         *4* - 📋 Outros assuntos\n\n\
         Digite *8* a qualquer momento para voltar a este menu.",
        company
    )
}

pub const ASK_CPF: &str =
    "Para localizar sua fatura, envie o *CPF* do titular (somente os 11 números).";

pub const SUPPORT_MENU: &str = "🛠️ *Suporte técnico*\n\n\
    *1* - Internet lenta\n\
    *2* - Sem conexão\n\
    *3* - Falar com um técnico\n\n\
    Digite *8* para voltar ao menu.";

pub const SLOW_INTERNET: &str = "Vamos tentar resolver a lentidão:\n\
    1. Desligue o roteador da tomada por 30 segundos e ligue novamente.\n\
    2. Se possível, teste a conexão com um cabo de rede.\n\
    3. Verifique quantos aparelhos estão conectados.\n\n\
    Se o problema continuar, digite *3* para falar com um técnico ou *8* para voltar ao menu.";

pub const NO_CONNECTION: &str = "Vamos verificar a sua conexão:\n\
    1. Confira se as luzes do equipamento estão acesas.\n\
    2. Verifique se os cabos estão bem encaixados.\n\
    3. Reinicie o roteador e a ONU.\n\n\
    Se continuar sem conexão, digite *3* para falar com um técnico ou *8* para voltar ao menu.";

pub const TECHNICIAN_HANDOFF: &str =
    "👨‍🔧 Certo! Um técnico vai continuar o seu atendimento por aqui em instantes.";

pub const HUMAN_HANDOFF: &str =
    "👤 Aguarde um momento, um de nossos atendentes vai falar com você em breve.";

pub const OTHER_SUBJECTS: &str =
    "📋 Descreva o seu assunto em uma mensagem e um atendente vai responder assim que possível.";

pub const PROCESSING_CPF: &str = "🔎 Só um momento, estou consultando o seu cadastro...";

pub const CPF_NOT_FOUND: &str = "❌ Não encontrei nenhum cadastro com este CPF. \
    Confira os números e envie novamente, ou digite *8* para voltar ao menu.";

pub const CPF_INVALID: &str = "❌ Este CPF não é válido. Confira os números e envie novamente, \
    ou digite *8* para voltar ao menu.";

pub const CPF_TOO_LONG: &str = "❌ Você enviou mais de 11 números. Envie apenas o CPF, \
    com 11 números, ou digite *8* para voltar ao menu.";

pub const CPF_MISSING: &str =
    "Por favor, envie o CPF do titular com os *11 números*, ou digite *8* para voltar ao menu.";

pub fn cpf_incomplete(received: usize) -> String {
    let missing = crate::normalize::CPF_LEN.saturating_sub(received);
    format!(
        "❌ CPF incompleto: recebi {} número(s), faltam {}. O CPF tem 11 números. \
         Envie novamente ou digite *8* para voltar ao menu.",
        received, missing
    )
}

pub const NO_SERVICES: &str = "Não encontrei nenhum serviço ativo no seu cadastro. \
    Digite *3* para falar com um atendente ou *8* para ver o menu.";

pub const NO_BILLS: &str = "Não encontrei faturas para o seu contrato. \
    Digite *3* para falar com um atendente ou *8* para ver o menu.";

pub const NOTHING_DUE: &str = "✅ Você não possui nenhuma cobrança em aberto. \
    Digite *8* para voltar ao menu.";

pub fn payment_options(first_name: &str, due: Option<&str>, amount: Option<&str>) -> String {
    let mut details = String::new();
    if let Some(due) = due {
        details.push_str(&format!("\n📅 Vencimento: {}", due));
    }
    if let Some(amount) = amount {
        details.push_str(&format!("\n💰 Valor: {}", amount));
    }
    format!(
        "Olá, *{}*! Encontrei a sua fatura.{}\n\n\
         Como deseja pagar?\n\
         *1* - PIX (copia e cola / QR Code)\n\
         *2* - Boleto (PDF)",
        first_name, details
    )
}

pub const CHOOSE_PAYMENT: &str =
    "Digite *1* para PIX ou *2* para Boleto. Para voltar ao menu, digite *8*.";

pub const PAYMENT_DATA_MISSING: &str = "Não encontrei os dados da sua fatura, \
    eles podem ter expirado. Envie novamente o CPF do titular (11 números).";

pub const PIX_CAPTION: &str = "QR Code PIX para pagamento";

pub const PIX_UNAVAILABLE: &str = "❌ Não foi possível gerar o PIX desta fatura agora. \
    Tente a opção *2* (Boleto) ou digite *8* para voltar ao menu.";

pub const AFTERCARE: &str = "✅ Pronto! Assim que o pagamento for confirmado a sua conexão \
    é liberada automaticamente. Se precisar de algo mais, digite *8* para voltar ao menu.";

pub fn boleto_caption(client_name: &str) -> String {
    format!("📄 Boleto de {}", client_name)
}

pub const BOLETO_FILE_NAME: &str = "boleto.pdf";
